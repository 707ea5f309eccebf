use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use ndarray::{Array1, Array2, Ix1, Ix2, OwnedRepr, aview1};
use ndarray_npy::{NpzReader, NpzWriter};
use serde::Serialize;

use super::{GalleryItem, Index, Stats};
use crate::error::{Result, RetrievalError};
use crate::utils::normalize_rows;

/// 特征矩阵在 npz 中的数组名
const EMBEDDINGS_KEY: &str = "embeddings";
/// 构建标识在 npz 中的数组名
const GENERATION_KEY: &str = "generation";

const INDEX_FILE: &str = "index.npz";
const METADATA_FILE: &str = "metadata.json";
const STATS_FILE: &str = "stats.json";

/// 索引文件的持久化
///
/// 目录结构：
/// - `index.npz`：压缩的 float32 特征矩阵，数组名为 `embeddings`；以及构建标识 `generation`
/// - `metadata.json`：与矩阵行一一对应的图片信息
/// - `stats.json`：统计信息，包含同一个构建标识
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 返回特征矩阵文件路径
    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// 返回元数据文件路径
    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// 返回统计信息文件路径
    pub fn stats_path(&self) -> PathBuf {
        self.dir.join(STATS_FILE)
    }

    /// 索引文件是否存在
    pub fn exists(&self) -> bool {
        self.index_path().is_file() && self.metadata_path().is_file()
    }

    /// 保存索引
    ///
    /// 所有文件先写入同目录下的临时目录，全部写完后再逐个重命名到目标位置，`stats.json` 最后替换。
    /// 中途失败时临时目录会被删除，旧的索引文件保持不变。
    ///
    /// 元数据的 blake3 哈希作为本次构建的标识，同时写入 `index.npz` 和 `stats.json`，
    /// 读取时据此发现混杂了不同次构建的文件。返回带有该标识的统计信息。
    pub fn save(&self, index: &Index, stats: &Stats) -> Result<Stats> {
        let io = |e: &dyn std::fmt::Display| RetrievalError::Io(e.to_string());

        fs::create_dir_all(&self.dir)?;
        let staging = tempfile::Builder::new().prefix(".staging-").tempdir_in(&self.dir)?;
        debug!("写入临时目录: {}", staging.path().display());

        let metadata = serde_json::to_vec_pretty(index.items()).map_err(|e| io(&e))?;
        let generation = blake3::hash(&metadata);
        let stats = Stats { generation: Some(generation.to_hex().to_string()), ..stats.clone() };

        let file = File::create(staging.path().join(INDEX_FILE))?;
        let mut npz = NpzWriter::new_compressed(file);
        npz.add_array(EMBEDDINGS_KEY, index.embeddings()).map_err(|e| io(&e))?;
        npz.add_array(GENERATION_KEY, &aview1(generation.as_bytes())).map_err(|e| io(&e))?;
        let file = npz.finish().map_err(|e| io(&e))?;
        file.sync_all()?;

        write_bytes(&staging.path().join(METADATA_FILE), &metadata)?;
        write_json(&staging.path().join(STATS_FILE), &stats)?;

        for name in [INDEX_FILE, METADATA_FILE, STATS_FILE] {
            fs::rename(staging.path().join(name), self.dir.join(name))?;
        }

        info!("索引已保存到 {}，构建标识 {}", self.dir.display(), generation.to_hex());
        Ok(stats)
    }

    /// 读取索引和统计信息
    pub fn load(&self) -> Result<(Index, Stats)> {
        for path in [self.index_path(), self.metadata_path()] {
            if !path.is_file() {
                return Err(RetrievalError::IndexNotFound(path));
            }
        }

        let (mut embeddings, generation) = self.load_arrays()?;
        let metadata = fs::read(self.metadata_path())?;
        let digest = blake3::hash(&metadata);
        if generation.iter().ne(digest.as_bytes().iter()) {
            return Err(RetrievalError::CorruptIndex(format!(
                "{} 与 {} 不属于同一次构建",
                self.index_path().display(),
                self.metadata_path().display()
            )));
        }
        let digest = digest.to_hex();

        let adjusted = normalize_rows(&mut embeddings);
        if adjusted > 0 {
            debug!("{} 行特征向量长度不为 1，已归一化", adjusted);
        }
        let items: Vec<GalleryItem> = serde_json::from_slice(&metadata).map_err(|e| {
            RetrievalError::CorruptIndex(format!("{}: {}", self.metadata_path().display(), e))
        })?;

        let stats = match self.stats_path().is_file() {
            true => Some(read_json::<Stats>(&self.stats_path())?),
            false => None,
        };
        if let Some(generation) = stats.as_ref().and_then(|stats| stats.generation.as_deref()) {
            if generation != digest.as_str() {
                return Err(RetrievalError::CorruptIndex(format!(
                    "{} 与 {} 不属于同一次构建",
                    self.stats_path().display(),
                    self.metadata_path().display()
                )));
            }
        }

        let (device, model) = match &stats {
            Some(stats) => (stats.device.clone(), stats.model.clone()),
            None => ("cpu".to_string(), None),
        };
        let index = Index::new(embeddings, items, device, model).map_err(RetrievalError::CorruptIndex)?;
        if index.is_empty() {
            return Err(RetrievalError::CorruptIndex(format!("{}: 索引为空", self.index_path().display())));
        }

        let stats = match stats {
            Some(stats) if stats.total_images == index.len() && stats.embedding_dim == index.dim() => stats,
            Some(stats) => {
                warn!("统计信息与索引内容不一致，使用索引内容重新生成");
                index.stats(stats.generated_at)
            }
            None => {
                warn!("缺少 {}，根据索引内容重新生成", self.stats_path().display());
                let modified = fs::metadata(self.metadata_path())?.modified()?;
                index.stats(DateTime::<Utc>::from(modified))
            }
        };
        let stats = Stats { generation: Some(digest.to_string()), ..stats };

        debug!("已加载索引: {} 张图片, {} 维", index.len(), index.dim());
        Ok((index, stats))
    }

    /// 读取特征矩阵和构建标识
    fn load_arrays(&self) -> Result<(Array2<f32>, Array1<u8>)> {
        let corrupt = |e: &dyn std::fmt::Display| {
            RetrievalError::CorruptIndex(format!("{}: {}", self.index_path().display(), e))
        };
        let file = File::open(self.index_path())?;
        let mut npz = NpzReader::new(file).map_err(|e| corrupt(&e))?;
        let names = npz.names().map_err(|e| corrupt(&e))?;
        let find = |key: &str| {
            names
                .iter()
                .find(|name| name.trim_end_matches(".npy") == key)
                .cloned()
                .ok_or_else(|| corrupt(&format!("缺少 {} 数组", key)))
        };
        let embeddings = npz
            .by_name::<OwnedRepr<f32>, Ix2>(&find(EMBEDDINGS_KEY)?)
            .map_err(|e| corrupt(&e))?;
        let generation = npz
            .by_name::<OwnedRepr<u8>, Ix1>(&find(GENERATION_KEY)?)
            .map_err(|e| corrupt(&e))?;
        Ok((embeddings, generation))
    }
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| RetrievalError::Io(e.to_string()))?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| RetrievalError::CorruptIndex(format!("{}: {}", path.display(), e)))
}
