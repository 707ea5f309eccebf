use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::debug;
use serde_json::json;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::search::SearchResponse;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 显示的结果数量
    #[arg(long, value_name = "K", env = "TOP_K", default_value_t = 12)]
    pub top_k: usize,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let retrieval = opts.retrieval().open()?;
        let response = retrieval.search_file(&self.image, self.top_k).await?;
        debug!("共 {} 条结果", response.results.len());
        print_result(&response, self)
    }
}

fn print_result(response: &SearchResponse, opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            let output = json!({
                "query": opts.image.display().to_string(),
                "results": response.results,
            });
            println!("{}", serde_json::to_string_pretty(&output)?)
        }
        OutputFormat::Table => {
            for hit in &response.results {
                println!("{}\t{:.4}\t{}", hit.rank, hit.score, hit.item.relative_path);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
