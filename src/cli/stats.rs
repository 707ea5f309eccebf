use anyhow::Result;
use clap::Parser;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::index::IndexStore;

#[derive(Parser, Debug, Clone)]
pub struct StatsCommand {}

impl SubCommandExtend for StatsCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let store = IndexStore::new(&opts.artifacts_dir);
        let (_, stats) = block_in_place(|| store.load())?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        Ok(())
    }
}
