//! Altlens - batch alt-text generation for images
//!
//! 核心库：推理后端适配、图片来源解析、推理流水线与结果缓存，
//! 以及表格导出与 HTML alt 注入。

pub mod ai;
pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod source;

#[cfg(test)]
mod test_server;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use ai::{BackendKind, DescribeBackend, InferenceResult};
pub use cache::{CacheEntry, ResultCache};
pub use config::AppConfig;
pub use error::{DescribeError, ErrorKind, RunError};
pub use export::PatchReport;
pub use pipeline::{CancelHandle, Pipeline, PipelineStatus, RunSummary};
pub use source::{ImageRef, ManifestRow, Origin, ResolvedSources};

/// 应用状态
///
/// 缓存只有一份，由流水线写入，其余组件只读。
pub struct AppState {
    /// 应用配置
    pub config: AppConfig,
    /// 结果缓存
    pub cache: Arc<ResultCache>,
    /// 推理流水线
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    /// 根据配置创建应用状态（选定后端）
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let backend = ai::build_backend(&config)?;
        Self::with_backend(config, backend)
    }

    /// 使用指定后端创建应用状态
    pub fn with_backend(
        config: AppConfig,
        backend: Arc<dyn DescribeBackend>,
    ) -> anyhow::Result<Self> {
        let loader = source::HttpImageLoader::new(Duration::from_secs(
            config.pipeline.load_timeout_secs,
        ))?;
        let cache = Arc::new(ResultCache::new());
        let pipeline = Arc::new(Pipeline::new(
            backend,
            Arc::new(loader),
            cache.clone(),
            config.pipeline.concurrency,
        ));

        Ok(Self {
            config,
            cache,
            pipeline,
        })
    }

    /// 重新扫描配置的图片目录
    pub async fn refresh(&self) -> Result<RunSummary, RunError> {
        let dir = self.config.pipeline.image_dir.clone();
        self.refresh_dir(&dir).await
    }

    /// 扫描指定目录
    pub async fn refresh_dir(&self, dir: &Path) -> Result<RunSummary, RunError> {
        info!("Refresh requested for {}", dir.display());
        let sources = source::scan_directory(dir)?;
        self.pipeline.run(sources).await
    }

    /// 处理清单行
    pub async fn process_manifest(&self, rows: Vec<ManifestRow>) -> Result<RunSummary, RunError> {
        let sources = source::resolve_manifest(rows);
        self.pipeline.run(sources).await
    }

    /// 读取清单文件并处理
    pub async fn process_manifest_file(&self, path: &Path) -> anyhow::Result<RunSummary> {
        let rows = export::read_manifest_file(path)?;
        Ok(self.process_manifest(rows).await?)
    }

    /// 处理单张图片
    pub async fn process_single(
        &self,
        name: Option<&str>,
        locator: &str,
    ) -> Result<RunSummary, RunError> {
        self.pipeline
            .run(source::resolve_single(name, locator))
            .await
    }

    /// 清空缓存
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// 缓存中的全部条目
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.cache.list()
    }

    /// 导出缓存到表格，返回行数
    pub fn export_spreadsheet(&self, path: &Path) -> anyhow::Result<usize> {
        let entries = self.cache.list();
        export::write_entries_file(path, &entries)?;
        Ok(entries.len())
    }

    /// 用缓存描述改写 HTML
    pub fn patch_html(&self, html: &str) -> PatchReport {
        export::patch_html(html, &self.cache.list())
    }

    /// 流水线状态
    pub fn status(&self) -> PipelineStatus {
        self.pipeline.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::StubBackend;
    use tempfile::tempdir;

    fn state_with_stub(image_dir: &Path) -> AppState {
        let mut config = AppConfig::default();
        config.pipeline.image_dir = image_dir.to_path_buf();
        AppState::with_backend(config, Arc::new(StubBackend::new())).unwrap()
    }

    #[tokio::test]
    async fn test_refresh_export_and_patch() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("cat.png"), b"cat").unwrap();
        std::fs::write(dir.path().join("dog.jpg"), b"dog").unwrap();

        let state = state_with_stub(dir.path());
        let summary = state.refresh().await.unwrap();
        assert_eq!(summary.notice(), "2 processed, 0 failed, 0 skipped");

        let report = state.patch_html(r#"<img src="images/cat.png">"#);
        assert_eq!(report.html, r#"<img alt="a photo of X" src="images/cat.png">"#);
        assert_eq!(report.unmatched, vec!["dog.jpg"]);

        // 导出后再作为清单导入，名称保持一致
        let out = dir.path().join("alt_tags.csv");
        assert_eq!(state.export_spreadsheet(&out).unwrap(), 2);
        let summary = state.process_manifest_file(&out).await.unwrap();
        assert_eq!(summary.names, vec!["cat.png", "dog.jpg"]);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_single_then_clear() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hero.webp");
        std::fs::write(&path, b"hero").unwrap();

        let state = state_with_stub(dir.path());
        let summary = state
            .process_single(None, &path.to_string_lossy())
            .await
            .unwrap();
        assert_eq!(summary.names, vec!["hero.webp"]);
        assert_eq!(state.entries().len(), 1);

        state.clear();
        assert!(state.entries().is_empty());
        assert_eq!(state.status().processed_count, 1);
    }

    #[tokio::test]
    async fn test_refresh_missing_directory_is_empty_run() {
        let dir = tempdir().unwrap();
        let state = state_with_stub(&dir.path().join("missing"));
        let summary = state.refresh().await.unwrap();
        assert_eq!((summary.succeeded, summary.failed), (0, 0));
        assert!(state.entries().is_empty());
    }

    #[test]
    fn test_build_backend_from_config() {
        let mut config = AppConfig::default();
        config.backend.kind = BackendKind::LocalDaemon;
        let state = AppState::new(config).unwrap();
        assert_eq!(state.pipeline.backend_kind(), BackendKind::LocalDaemon);
    }
}
