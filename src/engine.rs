use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use log::{debug, info, warn};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, spawn_blocking};
use tokio_util::sync::CancellationToken;

use crate::embed::{Embedder, ImageEmbedder};
use crate::error::{Result, RetrievalError};
use crate::index::{DEFAULT_SUFFIX, GalleryItem, Index, IndexBuilder, IndexStore, Stats};
use crate::metrics;
use crate::search::{SearchResponse, rank};

/// 正在服务的索引及其统计信息，创建后不再修改
#[derive(Debug)]
pub struct Snapshot {
    pub index: Index,
    pub stats: Stats,
}

/// 图库概览
#[derive(Debug, Clone)]
pub struct Gallery {
    pub total: usize,
    pub categories: Vec<String>,
    pub items: Vec<GalleryItem>,
}

type PendingBuild = Shared<BoxFuture<'static, Result<Arc<Snapshot>>>>;

/// 正在进行的加载或构建任务
struct Pending {
    /// 是否为强制重建
    rebuild: bool,
    future: PendingBuild,
}

pub struct RetrievalBuilder {
    artifacts_dir: PathBuf,
    dataset_dir: PathBuf,
    embedder: Option<Arc<dyn Embedder>>,
    suffix: String,
    search_workers: usize,
    progress: bool,
    cancel: CancellationToken,
}

impl RetrievalBuilder {
    pub fn new(artifacts_dir: impl Into<PathBuf>, dataset_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifacts_dir: artifacts_dir.into(),
            dataset_dir: dataset_dir.into(),
            embedder: None,
            suffix: DEFAULT_SUFFIX.to_string(),
            search_workers: num_cpus::get(),
            progress: false,
            cancel: CancellationToken::new(),
        }
    }

    /// 使用自定义的特征提取器，默认为 [`ImageEmbedder`]
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// 构建索引时扫描的文件后缀，逗号分隔
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// 同时提取查询图片特征的最大数量
    pub fn search_workers(mut self, search_workers: usize) -> Self {
        self.search_workers = search_workers.max(1);
        self
    }

    /// 构建索引时是否显示进度条
    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// 取消后正在进行的构建会中止，且不会写入索引文件
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn open(self) -> anyhow::Result<Retrieval> {
        let embedder = self.embedder.unwrap_or_else(|| Arc::new(ImageEmbedder::new()));
        let builder = IndexBuilder::new(embedder.clone())
            .suffix(&self.suffix)?
            .cancel_token(self.cancel.clone())
            .progress(self.progress);

        debug!("索引目录: {}", self.artifacts_dir.display());
        debug!("数据集目录: {}", self.dataset_dir.display());

        Ok(Retrieval {
            inner: Arc::new(Inner {
                store: IndexStore::new(self.artifacts_dir),
                dataset_dir: self.dataset_dir,
                embedder,
                builder,
                snapshot: RwLock::new(None),
                pending: Mutex::new(None),
                builds: AtomicUsize::new(0),
                cancel: self.cancel,
                workers: Arc::new(Semaphore::new(self.search_workers)),
            }),
        })
    }
}

/// 图像检索服务
///
/// 索引在第一次使用时加载，不存在或损坏时自动构建。同一时刻最多只有一个加载或构建任务，
/// 其余调用者等待同一个任务并得到相同的结果。
#[derive(Clone)]
pub struct Retrieval {
    inner: Arc<Inner>,
}

struct Inner {
    store: IndexStore,
    dataset_dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    builder: IndexBuilder,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    pending: Mutex<Option<Pending>>,
    builds: AtomicUsize,
    cancel: CancellationToken,
    workers: Arc<Semaphore>,
}

impl Retrieval {
    pub fn dataset_dir(&self) -> &Path {
        &self.inner.dataset_dir
    }

    /// 当前正在服务的索引
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.inner.snapshot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// 已开始的构建次数
    pub fn build_count(&self) -> usize {
        self.inner.builds.load(Ordering::SeqCst)
    }

    /// 确保索引可用
    pub async fn ensure_index_ready(&self) -> Result<Arc<Snapshot>> {
        match self.snapshot() {
            Some(snapshot) => Ok(snapshot),
            None => self.prepare(false).await,
        }
    }

    /// 带超时的 [`Self::ensure_index_ready`]，超时后构建仍在后台继续
    pub async fn ensure_index_ready_timeout(&self, timeout: Duration) -> Result<Arc<Snapshot>> {
        match tokio::time::timeout(timeout, self.ensure_index_ready()).await {
            Ok(result) => result,
            Err(_) => Err(RetrievalError::BuildInProgressTimeout(timeout.as_secs())),
        }
    }

    /// 重新构建索引，已有构建任务时加入该任务
    ///
    /// 构建失败时继续使用原来的索引。
    pub async fn rebuild(&self) -> Result<Arc<Snapshot>> {
        self.prepare(true).await
    }

    /// 搜索与图片最相似的 top_k 张图库图片
    pub async fn search<B>(&self, bytes: B, top_k: usize) -> Result<SearchResponse>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        let start = Instant::now();
        let result = self.search_inner(bytes, top_k).await;
        match &result {
            Ok(response) => {
                metrics::inc_search_count("ok");
                metrics::observe_search_duration(start.elapsed().as_secs_f32());
                if let Some(hit) = response.results.first() {
                    metrics::observe_search_top_score(hit.score);
                }
            }
            Err(e) => metrics::inc_search_count(e.code()),
        }
        result
    }

    /// 读取本地图片并搜索
    pub async fn search_file(&self, path: impl AsRef<Path>, top_k: usize) -> Result<SearchResponse> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        self.search(bytes, top_k).await
    }

    pub async fn stats(&self) -> Result<Stats> {
        Ok(self.ensure_index_ready().await?.stats.clone())
    }

    /// 返回图片总数、所有类别以及前 limit 张图片
    pub async fn gallery(&self, limit: usize) -> Result<Gallery> {
        let snapshot = self.ensure_index_ready().await?;
        let index = &snapshot.index;
        Ok(Gallery {
            total: index.len(),
            categories: index.categories(),
            items: index.items().iter().take(limit).cloned().collect(),
        })
    }

    /// 取消正在进行的构建
    pub fn shutdown(&self) {
        info!("取消正在进行的索引构建");
        self.inner.cancel.cancel();
    }

    async fn search_inner<B>(&self, bytes: B, top_k: usize) -> Result<SearchResponse>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        let snapshot = self.ensure_index_ready().await?;
        let permit =
            self.inner.workers.clone().acquire_owned().await.map_err(|_| RetrievalError::Cancelled)?;
        let embedder = self.inner.embedder.clone();
        let results = spawn_blocking(move || {
            let _permit = permit;
            let query = embedder.embed(bytes.as_ref())?;
            rank(&snapshot.index, query.view(), top_k)
        })
        .await
        .map_err(join_error)??;
        Ok(SearchResponse { results })
    }

    async fn prepare(&self, force: bool) -> Result<Arc<Snapshot>> {
        loop {
            let (join, future) = {
                let mut pending = self.inner.lock_pending();
                match pending.as_ref() {
                    // 强制重建只合并到另一个重建任务中
                    Some(job) => (job.rebuild || !force, job.future.clone()),
                    None => {
                        if !force {
                            if let Some(snapshot) = self.snapshot() {
                                return Ok(snapshot);
                            }
                        }
                        let task = tokio::spawn(self.inner.clone().load_or_build(force));
                        let future =
                            task.map(|r| r.map_err(join_error).and_then(|r| r)).boxed().shared();
                        *pending = Some(Pending { rebuild: force, future: future.clone() });
                        (true, future)
                    }
                }
            };
            if join {
                return future.await;
            }
            debug!("等待正在进行的索引加载结束后重建");
            let _ = future.await;
        }
    }
}

impl Inner {
    fn lock_pending(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn load_or_build(self: Arc<Self>, force: bool) -> Result<Arc<Snapshot>> {
        let worker = self.clone();
        let result = spawn_blocking(move || worker.load_or_build_blocking(force))
            .await
            .map_err(join_error)
            .and_then(|r| r);

        if let Ok(snapshot) = &result {
            metrics::set_indexed_images(snapshot.index.len());
            *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        }
        self.lock_pending().take();
        result
    }

    fn load_or_build_blocking(&self, force: bool) -> Result<Arc<Snapshot>> {
        if !force {
            match self.store.load() {
                Ok((index, stats)) if self.is_compatible(&index) => {
                    info!("已加载索引: {} 张图片", index.len());
                    return Ok(Arc::new(Snapshot { index, stats }));
                }
                Ok((index, _)) => warn!(
                    "索引由 {}（{} 维）生成，与当前模型 {}（{} 维）不一致，重新构建",
                    index.model().unwrap_or("unknown"),
                    index.dim(),
                    self.embedder.name(),
                    self.embedder.dim()
                ),
                Err(e) if e.needs_rebuild() => warn!("{}，重新构建索引", e),
                Err(e) => return Err(e),
            }
        }
        self.build()
    }

    fn build(&self) -> Result<Arc<Snapshot>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();

        let result = self.builder.build(&self.dataset_dir).and_then(|(index, stats)| {
            if self.cancel.is_cancelled() {
                return Err(RetrievalError::Cancelled);
            }
            let stats = self.store.save(&index, &stats)?;
            Ok(Arc::new(Snapshot { index, stats }))
        });

        match &result {
            Ok(_) => {
                metrics::inc_build_count("ok");
                metrics::observe_build_duration(start.elapsed().as_secs_f32());
            }
            Err(e) => {
                warn!("索引构建失败: {}", e);
                metrics::inc_build_count(e.code());
            }
        }
        result
    }

    fn is_compatible(&self, index: &Index) -> bool {
        index.dim() == self.embedder.dim()
            && index.model().is_none_or(|model| model == self.embedder.name())
    }
}

fn join_error(e: JoinError) -> RetrievalError {
    if e.is_cancelled() {
        RetrievalError::Cancelled
    } else {
        RetrievalError::EmbeddingFailure(format!("任务异常退出: {}", e))
    }
}
