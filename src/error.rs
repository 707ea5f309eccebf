use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = RetrievalError> = std::result::Result<T, E>;

/// 检索核心的错误类型
///
/// 所有变体都只携带可克隆的数据，以便单飞构建的结果能分发给所有等待者。
#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    /// 输入无法解码为图片
    #[error("无效的图片: {0}")]
    InvalidImage(String),
    /// 特征提取内部错误
    #[error("特征提取失败: {0}")]
    EmbeddingFailure(String),
    /// 数据集中没有可用的图片
    #[error("数据集 {} 中没有可用的图片", .0.display())]
    EmptyDataset(PathBuf),
    /// 数据集目录不存在
    #[error("数据集目录 {} 不存在", .0.display())]
    DatasetNotFound(PathBuf),
    /// 索引文件内容不一致或无法解析
    #[error("索引文件损坏: {0}")]
    CorruptIndex(String),
    /// 索引文件不存在
    #[error("未找到索引文件: {}", .0.display())]
    IndexNotFound(PathBuf),
    /// 等待构建超时
    #[error("等待索引构建超时（{0} 秒）")]
    BuildInProgressTimeout(u64),
    /// 构建被取消
    #[error("索引构建已取消")]
    Cancelled,
    #[error("IO 错误: {0}")]
    Io(String),
}

impl RetrievalError {
    /// 对外暴露的错误代码
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidImage(_) => "invalid_image",
            Self::EmbeddingFailure(_) => "embedding_failure",
            Self::EmptyDataset(_) => "empty_dataset",
            Self::DatasetNotFound(_) => "dataset_not_found",
            Self::CorruptIndex(_) => "corrupt_index",
            Self::IndexNotFound(_) => "index_not_found",
            Self::BuildInProgressTimeout(_) => "build_timeout",
            Self::Cancelled => "cancelled",
            Self::Io(_) => "io",
        }
    }

    /// 是否由调用方的输入导致
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidImage(_))
    }

    /// 是否可以稍后重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BuildInProgressTimeout(_) | Self::Cancelled)
    }

    /// 是否应当通过重新构建索引来恢复
    pub fn needs_rebuild(&self) -> bool {
        matches!(self, Self::CorruptIndex(_) | Self::IndexNotFound(_))
    }
}

impl From<std::io::Error> for RetrievalError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
