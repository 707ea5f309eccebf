use std::path::PathBuf;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::engine::RetrievalBuilder;
use crate::index::DEFAULT_SUFFIX;

static PROJECT_DIRS: LazyLock<Option<ProjectDirs>> =
    LazyLock::new(|| ProjectDirs::from("", "imretrieval", "imretrieval"));

/// 数据目录下的子目录，获取不到数据目录时使用当前目录
fn default_data_dir(name: &str) -> PathBuf {
    match PROJECT_DIRS.as_ref() {
        Some(dirs) => dirs.data_dir().join(name),
        None => PathBuf::from(name),
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imretrieval", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 索引文件目录
    #[arg(long, value_name = "DIR", env = "ARTIFACTS_DIR", default_value_os_t = default_data_dir("artifacts"))]
    pub artifacts_dir: PathBuf,
    /// 图库目录，每个子目录为一个类别
    #[arg(long, value_name = "DIR", env = "DATASET_DIR", default_value_os_t = default_data_dir("dataset"))]
    pub dataset_dir: PathBuf,
    /// 构建索引时扫描的图片后缀，多个后缀用逗号分隔
    #[arg(long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,
    /// 同时提取查询图片特征的最大数量，默认为 CPU 核心数
    #[arg(long, value_name = "N", default_value_t = num_cpus::get())]
    pub search_workers: usize,
}

impl Opts {
    /// 根据全局选项创建检索服务
    pub fn retrieval(&self) -> RetrievalBuilder {
        RetrievalBuilder::new(&self.artifacts_dir, &self.dataset_dir)
            .suffix(&self.suffix)
            .search_workers(self.search_workers)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描图库并重新构建索引
    Build(BuildCommand),
    /// 搜索与图片相似的图库图片
    Search(SearchCommand),
    /// 显示已保存索引的统计信息
    Stats(StatsCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
}
