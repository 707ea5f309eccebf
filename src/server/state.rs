use std::sync::Arc;
use std::time::Duration;

use crate::cli::server::ServerCommand;
use crate::engine::Retrieval;

/// 应用状态
pub struct AppState {
    /// 检索服务
    pub retrieval: Retrieval,
    /// 图库图片的访问路径前缀，以 `/` 开头且不以 `/` 结尾
    pub static_prefix: String,
    /// 默认返回的结果数量
    pub top_k: usize,
    /// 上传大小限制，单位字节
    pub max_upload: usize,
    /// 等待索引就绪的最长时间
    pub build_timeout: Duration,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(retrieval: Retrieval, opts: &ServerCommand) -> Arc<Self> {
        Arc::new(AppState {
            retrieval,
            static_prefix: normalize_prefix(&opts.static_prefix),
            top_k: opts.top_k.max(1),
            max_upload: opts.max_upload_mb * 1024 * 1024,
            build_timeout: Duration::from_secs(opts.build_timeout),
        })
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    match trimmed.is_empty() {
        true => "/dataset".to_string(),
        false => format!("/{}", trimmed),
    }
}
