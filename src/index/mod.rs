mod builder;
mod store;

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use self::builder::*;
pub use self::store::*;

/// 图库中的一张图片
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GalleryItem {
    /// 在索引中的行号
    #[serde(skip)]
    pub id: usize,
    /// 相对于数据集根目录的路径，使用 `/` 分隔
    pub relative_path: String,
    /// 类别，即图片所在目录名
    pub label: String,
    /// 文件名
    pub filename: String,
}

/// 索引统计信息，每次构建时重新生成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Stats {
    pub total_images: usize,
    pub embedding_dim: usize,
    pub generated_at: DateTime<Utc>,
    pub device: String,
    /// 生成索引时使用的模型
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// 本次构建的标识，即 `metadata.json` 内容的 blake3 哈希
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<String>,
}

/// 图库特征矩阵及其元数据
#[derive(Debug, Clone)]
pub struct Index {
    embeddings: Array2<f32>,
    items: Vec<GalleryItem>,
    device: String,
    model: Option<String>,
}

impl Index {
    /// 创建索引，矩阵行数必须与图片数量一致
    ///
    /// 图片的 `id` 会按行号重新编号。
    pub fn new(
        embeddings: Array2<f32>,
        mut items: Vec<GalleryItem>,
        device: impl Into<String>,
        model: Option<String>,
    ) -> Result<Self, String> {
        if embeddings.nrows() != items.len() {
            return Err(format!(
                "特征矩阵行数 {} 与图片数量 {} 不一致",
                embeddings.nrows(),
                items.len()
            ));
        }
        for (id, item) in items.iter_mut().enumerate() {
            item.id = id;
        }
        Ok(Self { embeddings, items, device: device.into(), model })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.embeddings.ncols()
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn embeddings(&self) -> &Array2<f32> {
        &self.embeddings
    }

    pub fn items(&self) -> &[GalleryItem] {
        &self.items
    }

    /// 所有类别，已排序去重
    pub fn categories(&self) -> Vec<String> {
        let mut labels = self.items.iter().map(|item| item.label.clone()).collect::<Vec<_>>();
        labels.sort_unstable();
        labels.dedup();
        labels
    }

    /// 根据索引内容生成统计信息
    pub fn stats(&self, generated_at: DateTime<Utc>) -> Stats {
        Stats {
            total_images: self.len(),
            embedding_dim: self.dim(),
            generated_at,
            device: self.device.clone(),
            model: self.model.clone(),
            generation: None,
        }
    }
}
