//! 推理后端抽象
//!
//! 两种实现：远程托管 API（Hugging Face）与本地守护进程（Ollama）。
//! 后端在启动时根据配置选定一次，运行期间不可更换。

use crate::error::{DescribeError, ErrorKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 后端类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    /// 远程托管推理 API
    #[default]
    #[serde(rename = "huggingface", alias = "remote")]
    RemoteHosted,
    /// 本地推理守护进程
    #[serde(rename = "ollama", alias = "local")]
    LocalDaemon,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteHosted => "huggingface",
            Self::LocalDaemon => "ollama",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "huggingface" | "remote" => Ok(Self::RemoteHosted),
            "ollama" | "local" => Ok(Self::LocalDaemon),
            other => Err(format!(
                "unknown backend '{}', expected 'huggingface' or 'ollama'",
                other
            )),
        }
    }
}

/// 单次推理结果
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceResult {
    Success {
        description: String,
        backend: BackendKind,
    },
    Failure {
        reason: ErrorKind,
        detail: String,
    },
}

impl InferenceResult {
    /// 由描述文本构造结果：仅去除首尾空白，空文本视为响应格式错误
    pub fn from_text(text: &str, backend: BackendKind) -> Self {
        let description = text.trim();
        if description.is_empty() {
            return DescribeError::backend("backend returned an empty description").into();
        }
        Self::Success {
            description: description.to_string(),
            backend,
        }
    }
}

impl From<DescribeError> for InferenceResult {
    fn from(err: DescribeError) -> Self {
        Self::Failure {
            reason: err.kind,
            detail: err.detail,
        }
    }
}

/// 推理后端
#[async_trait]
pub trait DescribeBackend: Send + Sync {
    /// 后端类型（写入每条成功结果）
    fn kind(&self) -> BackendKind;

    /// 后端名称，用于日志
    fn backend_name(&self) -> String {
        self.kind().to_string()
    }

    /// 运行前检查配置与连通性
    async fn preflight(&self) -> Result<(), DescribeError> {
        Ok(())
    }

    /// 为一张图片生成描述
    async fn describe(&self, image: &[u8]) -> InferenceResult;
}

/// 根据图片字节推断 MIME 类型
pub fn sniff_mime(image: &[u8]) -> &'static str {
    image::guess_format(image)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream")
}

/// 截断过长的响应体，避免日志和错误标记膨胀
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX_CHARS: usize = 200;
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        trimmed.to_string()
    } else {
        let mut s: String = trimmed.chars().take(MAX_CHARS).collect();
        s.push('…');
        s
    }
}
