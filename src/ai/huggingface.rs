//! 远程托管推理后端（Hugging Face Inference API）
//!
//! 直接以原始图片字节作为请求体，响应为 `[{"generated_text": "..."}]`。

use super::backend::{sniff_mime, truncate_body, BackendKind, DescribeBackend, InferenceResult};
use crate::error::DescribeError;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 远程 API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HuggingFaceConfig {
    /// 模型推理端点
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// API 密钥（也可由 HUGGINGFACE_API_KEY 提供）
    #[serde(default)]
    pub api_key: Option<String>,
    /// 请求超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://api-inference.huggingface.co/models/nlpconnect/vit-gpt2-image-captioning".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl HuggingFaceConfig {
    /// 返回非空的 API 密钥
    fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

/// 响应中的单条结果
#[derive(Debug, Deserialize)]
struct Caption {
    generated_text: String,
}

/// 远程托管 API 适配器
pub struct RemoteHostedAdapter {
    config: HuggingFaceConfig,
    client: reqwest::Client,
}

impl RemoteHostedAdapter {
    pub fn new(config: HuggingFaceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn missing_credential() -> DescribeError {
        DescribeError::backend("HUGGINGFACE_API_KEY not set")
    }

    async fn call_api(&self, image: &[u8]) -> Result<String, DescribeError> {
        let key = self.config.credential().ok_or_else(Self::missing_credential)?;

        info!(
            "HF API Request: endpoint={}, image_size={}KB",
            self.config.endpoint,
            image.len() / 1024
        );
        let start_time = Instant::now();

        let response = self
            .client
            .post(&self.config.endpoint)
            .header(AUTHORIZATION, format!("Bearer {}", key))
            .header(CONTENT_TYPE, sniff_mime(image))
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| {
                warn!("HF API request failed: {}", e);
                DescribeError::from_transport(&e)
            })?;

        let status = response.status();
        info!(
            "HF API Response: status={}, elapsed={:.2}s",
            status,
            start_time.elapsed().as_secs_f64()
        );

        let body = response
            .text()
            .await
            .map_err(|e| DescribeError::from_transport(&e))?;

        if !status.is_success() {
            warn!("HF API Error: status={}, body={}", status, body);
            return Err(DescribeError::backend(format!(
                "API error {}: {}",
                status,
                truncate_body(&body)
            )));
        }

        Self::parse_response(&body)
    }

    /// 严格解析响应：必须是非空数组，首元素带 generated_text
    fn parse_response(body: &str) -> Result<String, DescribeError> {
        let captions: Vec<Caption> = serde_json::from_str(body).map_err(|e| {
            debug!("Raw: {}", body);
            DescribeError::backend(format!("unexpected API response format: {}", e))
        })?;

        captions
            .into_iter()
            .next()
            .map(|c| c.generated_text)
            .ok_or_else(|| DescribeError::backend("API returned no captions"))
    }
}

#[async_trait]
impl DescribeBackend for RemoteHostedAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::RemoteHosted
    }

    fn backend_name(&self) -> String {
        format!("Hugging Face ({})", self.config.endpoint)
    }

    async fn preflight(&self) -> Result<(), DescribeError> {
        if self.config.credential().is_none() {
            return Err(Self::missing_credential());
        }
        Ok(())
    }

    async fn describe(&self, image: &[u8]) -> InferenceResult {
        match self.call_api(image).await {
            Ok(text) => InferenceResult::from_text(&text, self.kind()),
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_server::serve;

    #[test]
    fn test_parse_response() {
        let body = r#"[{"generated_text": "a dog running on the beach"}]"#;
        assert_eq!(
            RemoteHostedAdapter::parse_response(body).unwrap(),
            "a dog running on the beach"
        );
    }

    #[test]
    fn test_parse_response_rejects_other_shapes() {
        for body in [
            r#"{"error": "Model is currently loading"}"#,
            r#"[]"#,
            r#"[{"label": "cat", "score": 0.9}]"#,
            "not json",
        ] {
            let err = RemoteHostedAdapter::parse_response(body).unwrap_err();
            assert_eq!(err.kind, ErrorKind::BackendError, "body: {}", body);
        }
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let adapter = RemoteHostedAdapter::new(HuggingFaceConfig {
            api_key: Some("  ".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            adapter.preflight().await.unwrap_err().kind,
            ErrorKind::BackendError
        );
        match adapter.describe(b"bytes").await {
            InferenceResult::Failure { reason, detail } => {
                assert_eq!(reason, ErrorKind::BackendError);
                assert!(detail.contains("HUGGINGFACE_API_KEY"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let adapter = RemoteHostedAdapter::new(HuggingFaceConfig {
            endpoint: "http://127.0.0.1:9/models/none".to_string(),
            api_key: Some("hf_test".to_string()),
            timeout_secs: 5,
        })
        .unwrap();

        match adapter.describe(b"bytes").await {
            InferenceResult::Failure { reason, .. } => assert_eq!(reason, ErrorKind::Unreachable),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    fn adapter_for(base: &str) -> RemoteHostedAdapter {
        RemoteHostedAdapter::new(HuggingFaceConfig {
            endpoint: format!("{}/models/captioner", base),
            api_key: Some("hf_test".to_string()),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_describe_over_http() {
        let base = serve(
            200,
            "application/json",
            r#"[{"generated_text": " a dog running on the beach "}]"#,
        )
        .await;

        assert_eq!(
            adapter_for(&base).describe(b"bytes").await,
            InferenceResult::Success {
                description: "a dog running on the beach".to_string(),
                backend: BackendKind::RemoteHosted,
            }
        );
    }

    #[tokio::test]
    async fn test_non_success_status_is_backend_error() {
        let base = serve(
            503,
            "application/json",
            r#"{"error": "Model is currently loading"}"#,
        )
        .await;

        match adapter_for(&base).describe(b"bytes").await {
            InferenceResult::Failure { reason, detail } => {
                assert_eq!(reason, ErrorKind::BackendError);
                assert!(detail.contains("503"), "detail: {}", detail);
                assert!(detail.contains("currently loading"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
