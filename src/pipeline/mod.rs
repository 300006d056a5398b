//! 推理流水线
//!
//! 按解析顺序逐张加载图片、调用后端生成描述，结果写入缓存暂存区，
//! 整批完成后一次性替换可见缓存。单张失败只记录为错误条目，不中断整批。

use crate::ai::{BackendKind, DescribeBackend, InferenceResult};
use crate::cache::{CacheEntry, ResultCache};
use crate::error::{DescribeError, RunError};
use crate::source::{ImageLoader, ImageRef, ResolvedSources};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 流水线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 目录模式扫描的图片目录
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    /// 同时进行的加载+推理数量
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 远程图片下载超时（秒）
    #[serde(default = "default_load_timeout_secs")]
    pub load_timeout_secs: u64,
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("static/images")
}

fn default_concurrency() -> usize {
    1
}

fn default_load_timeout_secs() -> u64 {
    30
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_dir: default_image_dir(),
            concurrency: default_concurrency(),
            load_timeout_secs: default_load_timeout_secs(),
        }
    }
}

/// 运行摘要
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub backend: BackendKind,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_malformed: usize,
    /// 本次运行后缓存中的名称（有序）
    pub names: Vec<String>,
    pub elapsed_ms: u64,
}

impl RunSummary {
    /// 供界面展示的提示文本
    pub fn notice(&self) -> String {
        format!(
            "{} processed, {} failed, {} skipped",
            self.succeeded + self.failed,
            self.failed,
            self.skipped_malformed
        )
    }
}

/// 流水线状态
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub is_running: bool,
    /// 累计成功数
    pub processed_count: u64,
    /// 累计失败数
    pub failed_count: u64,
}

/// 协作式取消标记，在两张图片之间检查
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 运行标记；future 被中途丢弃时同样复位
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn start(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 推理流水线
pub struct Pipeline {
    backend: Arc<dyn DescribeBackend>,
    loader: Arc<dyn ImageLoader>,
    cache: Arc<ResultCache>,
    concurrency: usize,
    run_lock: Mutex<()>,
    cancel: CancelHandle,
    is_running: Arc<AtomicBool>,
    processed_count: Arc<AtomicU64>,
    failed_count: Arc<AtomicU64>,
}

impl Pipeline {
    /// 创建流水线
    pub fn new(
        backend: Arc<dyn DescribeBackend>,
        loader: Arc<dyn ImageLoader>,
        cache: Arc<ResultCache>,
        concurrency: usize,
    ) -> Self {
        Self {
            backend,
            loader,
            cache,
            concurrency: concurrency.max(1),
            run_lock: Mutex::new(()),
            cancel: CancelHandle::new(),
            is_running: Arc::new(AtomicBool::new(false)),
            processed_count: Arc::new(AtomicU64::new(0)),
            failed_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 使用外部提供的取消标记
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// 请求取消当前运行
    pub fn cancel(&self) {
        info!("Pipeline cancellation requested");
        self.cancel.cancel();
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// 获取状态
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            is_running: self.is_running.load(Ordering::SeqCst),
            processed_count: self.processed_count.load(Ordering::SeqCst),
            failed_count: self.failed_count.load(Ordering::SeqCst),
        }
    }

    /// 处理一批图片，完成后替换缓存
    pub async fn run(&self, sources: ResolvedSources) -> Result<RunSummary, RunError> {
        let _guard = self.run_lock.lock().await;
        self.cancel.reset();

        let run_id = Uuid::new_v4();
        let backend = self.backend.kind();
        let total = sources.images.len();

        info!(
            "Run {} started: backend={}, images={}, skipped_malformed={}, concurrency={}",
            run_id, backend, total, sources.skipped_malformed, self.concurrency
        );

        if let Err(e) = self.backend.preflight().await {
            warn!("Run {} aborted, backend not usable: {}", run_id, e);
            return Err(RunError::Backend(e));
        }

        let _running = RunningGuard::start(&self.is_running);
        self.run_batch(run_id, sources).await
    }

    async fn run_batch(
        &self,
        run_id: Uuid,
        sources: ResolvedSources,
    ) -> Result<RunSummary, RunError> {
        let start_time = Instant::now();
        let backend = self.backend.kind();
        let mut stage = self.cache.begin_run();
        let mut succeeded = 0usize;
        let mut failed = 0usize;

        let mut results = stream::iter(sources.images)
            .map(|image| async move {
                let result = self.process_one(&image).await;
                (image, result)
            })
            .buffered(self.concurrency);

        loop {
            if self.cancel.is_cancelled() {
                let processed = succeeded + failed;
                warn!("Run {} cancelled after {} images", run_id, processed);
                return Err(RunError::Cancelled { processed });
            }

            let Some((image, result)) = results.next().await else {
                break;
            };

            let entry = match result {
                InferenceResult::Success {
                    description,
                    backend,
                } => {
                    succeeded += 1;
                    self.processed_count.fetch_add(1, Ordering::SeqCst);
                    debug!("Described {}: '{}'", image.name, description);
                    CacheEntry::success(&image.name, &image.locator, description, backend)
                }
                InferenceResult::Failure { reason, detail } => {
                    failed += 1;
                    self.failed_count.fetch_add(1, Ordering::SeqCst);
                    let err = DescribeError::new(reason, detail);
                    warn!("Failed to describe {}: {}", image.name, err);
                    CacheEntry::failure(&image.name, &image.locator, &err, backend)
                }
            };
            stage.put(entry);
        }

        let names = self.cache.commit(stage);
        let summary = RunSummary {
            run_id,
            backend,
            succeeded,
            failed,
            skipped_malformed: sources.skipped_malformed,
            names,
            elapsed_ms: start_time.elapsed().as_millis() as u64,
        };

        info!(
            "Run {} finished: {} ({:.2}s)",
            run_id,
            summary.notice(),
            start_time.elapsed().as_secs_f64()
        );
        Ok(summary)
    }

    /// 处理单张图片：加载失败直接转换为 LoadError 结果
    async fn process_one(&self, image: &ImageRef) -> InferenceResult {
        match self.loader.load(image).await {
            Ok(bytes) => self.backend.describe(&bytes).await,
            Err(e) => e.into(),
        }
    }
}
