use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use indicatif::ProgressBar;
use log::{info, warn};
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::{GalleryItem, Index, Stats};
use crate::embed::Embedder;
use crate::error::{Result, RetrievalError};
use crate::utils::{pb_style, relative_slash_path, suffix_regex};

/// 默认扫描的图片后缀
pub const DEFAULT_SUFFIX: &str = "jpg,jpeg,png";

/// 扫描数据集目录并构建索引
pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
    suffix: Regex,
    cancel: CancellationToken,
    progress: bool,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            suffix: suffix_regex(DEFAULT_SUFFIX).expect("default suffix is a valid regex"),
            cancel: CancellationToken::new(),
            progress: false,
        }
    }

    /// 设置扫描的文件后缀，多个后缀用逗号分隔
    pub fn suffix(mut self, suffix: &str) -> Result<Self, regex::Error> {
        self.suffix = suffix_regex(suffix)?;
        Ok(self)
    }

    /// 设置取消令牌，取消后构建会尽快中止
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 是否显示进度条
    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// 按路径顺序列出数据集中的所有候选图片
    pub fn scan(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.is_dir() {
            return Err(RetrievalError::DatasetNotFound(root.to_path_buf()));
        }
        info!("开始扫描目录: {}", root.display());
        let images = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("无法访问: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension().is_some_and(|ext| self.suffix.is_match(&ext.to_string_lossy()))
            })
            .collect::<Vec<_>>();
        info!("扫描完成，共 {} 张图片", images.len());
        Ok(images)
    }

    /// 构建索引
    ///
    /// 单张图片读取或提取特征失败时跳过并记录警告，不会中止整个构建。
    pub fn build(&self, root: &Path) -> Result<(Index, Stats)> {
        let start = Instant::now();
        let paths = self.scan(root)?;

        let pb = match self.progress {
            true => ProgressBar::new(paths.len() as u64).with_style(pb_style()),
            false => ProgressBar::hidden(),
        };

        let results = paths
            .par_iter()
            .map(|path| {
                if self.cancel.is_cancelled() {
                    return None;
                }
                let result = self.embed_file(path);
                pb.inc(1);
                match result {
                    Ok(embedding) => Some((path, embedding)),
                    Err(e) => {
                        warn!("跳过 {}: {}", path.display(), e);
                        None
                    }
                }
            })
            .collect::<Vec<_>>();

        if self.cancel.is_cancelled() {
            pb.abandon_with_message("构建已取消");
            return Err(RetrievalError::Cancelled);
        }
        pb.finish_with_message("特征提取完成");

        let embedded = results.into_iter().flatten().collect::<Vec<_>>();
        if embedded.is_empty() {
            return Err(RetrievalError::EmptyDataset(root.to_path_buf()));
        }
        info!("成功 {} 张，跳过 {} 张", embedded.len(), paths.len() - embedded.len());

        let dim = self.embedder.dim();
        let mut embeddings = Array2::<f32>::zeros((embedded.len(), dim));
        let mut items = Vec::with_capacity(embedded.len());
        for (row, (path, embedding)) in embedded.into_iter().enumerate() {
            embeddings.row_mut(row).assign(&embedding);
            items.push(gallery_item(row, path, root));
        }

        let index = Index::new(
            embeddings,
            items,
            self.embedder.device(),
            Some(self.embedder.name().to_string()),
        )
        .map_err(RetrievalError::CorruptIndex)?;
        let stats = index.stats(Utc::now());

        info!("索引构建完成，耗时 {:.2}s", start.elapsed().as_secs_f32());
        Ok((index, stats))
    }

    fn embed_file(&self, path: &Path) -> Result<Array1<f32>> {
        let bytes = fs::read(path)?;
        let embedding = self.embedder.embed(&bytes)?;
        if embedding.len() != self.embedder.dim() {
            return Err(RetrievalError::EmbeddingFailure(format!(
                "特征维度 {} 与模型维度 {} 不一致",
                embedding.len(),
                self.embedder.dim()
            )));
        }
        Ok(embedding)
    }
}

fn gallery_item(id: usize, path: &Path, root: &Path) -> GalleryItem {
    let label = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let filename = path.file_name().map(|name| name.to_string_lossy().to_string()).unwrap_or_default();
    let relative_path =
        relative_slash_path(path, root).unwrap_or_else(|| path.to_string_lossy().replace('\\', "/"));
    GalleryItem { id, relative_path, label, filename }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::embed::ImageEmbedder;
    use crate::testing::{sample_dataset, write_image};

    fn builder() -> IndexBuilder {
        IndexBuilder::new(Arc::new(ImageEmbedder::new()))
    }

    #[test]
    fn test_build_sample_dataset() {
        let dir = TempDir::new().unwrap();
        sample_dataset(dir.path());

        let (index, stats) = builder().build(dir.path()).unwrap();
        assert_eq!(stats.total_images, 3);
        assert_eq!(stats.embedding_dim, index.dim());
        assert_eq!(stats.device, "cpu");
        assert_eq!(stats.model.as_deref(), Some("color-dct-edge-v1"));

        let paths = index.items().iter().map(|item| item.relative_path.as_str()).collect::<Vec<_>>();
        assert_eq!(paths, vec!["cat/a.jpg", "cat/b.jpg", "dog/c.jpg"]);
        assert_eq!(index.items()[2].label, "dog");
        assert_eq!(index.items()[2].filename, "c.jpg");
        assert_eq!(index.items()[2].id, 2);
    }

    #[test]
    fn test_build_skips_corrupt_images() {
        let dir = TempDir::new().unwrap();
        sample_dataset(dir.path());
        fs::write(dir.path().join("dog/broken.jpg"), b"not really a jpeg").unwrap();
        fs::write(dir.path().join("cat/empty.png"), b"").unwrap();
        fs::write(dir.path().join("cat/notes.txt"), b"ignored").unwrap();

        let (index, stats) = builder().build(dir.path()).unwrap();
        assert_eq!(stats.total_images, 3);
        assert!(index.items().iter().all(|item| item.filename != "broken.jpg"));
    }

    #[test]
    fn test_build_uppercase_suffix() {
        let dir = TempDir::new().unwrap();
        write_image(&dir.path().join("bird/x.PNG"), 5);
        let (index, _) = builder().build(dir.path()).unwrap();
        assert_eq!(index.items()[0].relative_path, "bird/x.PNG");
    }

    #[test]
    fn test_build_custom_suffix() {
        let dir = TempDir::new().unwrap();
        sample_dataset(dir.path());
        let err = builder().suffix("png").unwrap().build(dir.path()).unwrap_err();
        assert!(matches!(err, RetrievalError::EmptyDataset(_)));
    }

    #[test]
    fn test_build_empty_dataset() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("cat")).unwrap();
        fs::write(dir.path().join("cat/broken.jpg"), b"garbage").unwrap();
        let err = builder().build(dir.path()).unwrap_err();
        assert!(matches!(err, RetrievalError::EmptyDataset(_)));
    }

    #[test]
    fn test_build_missing_dataset() {
        let dir = TempDir::new().unwrap();
        let err = builder().build(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, RetrievalError::DatasetNotFound(_)));
    }

    #[test]
    fn test_build_cancelled() {
        let dir = TempDir::new().unwrap();
        sample_dataset(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = builder().cancel_token(cancel).build(dir.path()).unwrap_err();
        assert!(matches!(err, RetrievalError::Cancelled));
    }
}
