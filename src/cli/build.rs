use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::Opts;
use crate::cli::SubCommandExtend;

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    /// 不显示进度条
    #[arg(long)]
    pub no_progress: bool,
}

impl SubCommandExtend for BuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let cancel = CancellationToken::new();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("收到中断信号，正在取消构建");
                    cancel.cancel();
                }
            }
        });

        let retrieval =
            opts.retrieval().progress(!self.no_progress).cancel_token(cancel).open()?;
        let snapshot = retrieval.rebuild().await?;
        info!("构建索引成功");

        println!("{}", serde_json::to_string_pretty(&snapshot.stats)?);
        Ok(())
    }
}
