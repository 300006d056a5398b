//! AI 推理模块
//!
//! 统一的图片描述接口，支持远程托管 API 与本地 Ollama 守护进程。

pub mod backend;
pub mod huggingface;
pub mod ollama;

pub use backend::{BackendKind, DescribeBackend, InferenceResult};
pub use huggingface::{HuggingFaceConfig, RemoteHostedAdapter};
pub use ollama::{LocalDaemonAdapter, OllamaConfig};

use crate::config::AppConfig;
use std::sync::Arc;
use tracing::info;

/// 根据配置创建后端（进程内只选择一次）
pub fn build_backend(config: &AppConfig) -> anyhow::Result<Arc<dyn DescribeBackend>> {
    let backend: Arc<dyn DescribeBackend> = match config.backend.kind {
        BackendKind::RemoteHosted => {
            Arc::new(RemoteHostedAdapter::new(config.huggingface.clone())?)
        }
        BackendKind::LocalDaemon => Arc::new(LocalDaemonAdapter::new(config.ollama.clone())?),
    };
    info!("Inference backend selected: {}", backend.backend_name());
    Ok(backend)
}
