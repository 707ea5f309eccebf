use clap::Parser;
use log::{error, info, warn};
use tokio::net::TcpListener;

use crate::cli::SubCommandExtend;
use crate::engine::Retrieval;
use crate::{Opts, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    /// 监听地址
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,
    /// 监听端口
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,
    /// 图库图片的访问路径前缀
    #[arg(long, value_name = "PREFIX", env = "STATIC_PREFIX", default_value = "/dataset")]
    pub static_prefix: String,
    /// 上传文件大小限制，单位 MB
    #[arg(long, value_name = "MB", env = "MAX_UPLOAD_MB", default_value_t = 10)]
    pub max_upload_mb: usize,
    /// 默认返回的结果数量
    #[arg(long, value_name = "K", env = "TOP_K", default_value_t = 12)]
    pub top_k: usize,
    /// 请求等待索引就绪的最长时间，单位秒
    #[arg(long, value_name = "SECONDS", default_value_t = 600)]
    pub build_timeout: u64,
}

impl Default for ServerCommand {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            static_prefix: "/dataset".to_string(),
            max_upload_mb: 10,
            top_k: 12,
            build_timeout: 600,
        }
    }
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let retrieval = opts.retrieval().open()?;

        // 后台预热索引，失败时等到第一个请求再重试
        tokio::spawn({
            let retrieval = retrieval.clone();
            async move {
                if let Err(e) = retrieval.ensure_index_ready().await {
                    error!("索引准备失败: {}", e);
                }
            }
        });

        let state = server::AppState::new(retrieval.clone(), self);
        let app = server::create_app(state);

        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;
        info!("服务器启动：http://{}", listener.local_addr()?);
        axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(retrieval)).await?;

        info!("服务器已停止");
        Ok(())
    }
}

async fn shutdown_signal(retrieval: Retrieval) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("无法监听中断信号: {}", e);
        std::future::pending::<()>().await;
    }
    warn!("收到中断信号，正在关闭服务器");
    retrieval.shutdown();
}
