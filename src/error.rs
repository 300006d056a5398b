//! 错误类型
//!
//! 单张图片的失败会被转换成缓存中的错误条目，不会中断整批处理；
//! 只有配置级错误（凭据缺失、守护进程不可达）才会直接返回给调用方。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 缓存中错误描述的固定前缀
pub const ERROR_MARKER_PREFIX: &str = "Error:";

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 图片无法读取或下载
    LoadError,
    /// 推理后端无法连接（超时、拒绝连接、端点非法）
    Unreachable,
    /// 后端可达，但返回了非成功状态或无法解析的响应
    BackendError,
    /// 本地守护进程未安装所请求的模型
    ModelNotFound,
    /// 清单中缺少名称或路径的行（跳过并计数）
    MalformedManifestRow,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadError => "load error",
            Self::Unreachable => "backend unreachable",
            Self::BackendError => "backend error",
            Self::ModelNotFound => "model not found",
            Self::MalformedManifestRow => "malformed manifest row",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单次加载或推理失败
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct DescribeError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl DescribeError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn load(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::LoadError, detail)
    }

    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unreachable, detail)
    }

    pub fn backend(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendError, detail)
    }

    pub fn model_not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ModelNotFound, detail)
    }

    /// 将 reqwest 传输层错误归类：连接/超时/请求构造失败视为不可达，其余视为后端错误
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_builder() {
            Self::unreachable(err.to_string())
        } else {
            Self::backend(err.to_string())
        }
    }

    /// 缓存中展示的错误描述
    pub fn marker(&self) -> String {
        format!("{} {} ({})", ERROR_MARKER_PREFIX, self.kind, self.detail)
    }
}

/// 一次处理运行的失败
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// 后端在运行前检查中失败，所有图片都会以相同方式失败
    #[error("backend not usable: {0}")]
    Backend(DescribeError),
    /// 运行被取消，可见缓存保持运行前的状态
    #[error("run cancelled after {processed} images")]
    Cancelled { processed: usize },
    #[error("failed to resolve image sources: {0}")]
    Source(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_format() {
        let err = DescribeError::load("No such file or directory");
        assert_eq!(
            err.marker(),
            "Error: load error (No such file or directory)"
        );
        assert!(err.marker().starts_with(ERROR_MARKER_PREFIX));
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::ModelNotFound).unwrap();
        assert_eq!(json, "\"model_not_found\"");
    }
}
