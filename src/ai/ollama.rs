//! 本地推理守护进程后端（Ollama）
//!
//! 请求体固定为模型名 + 提示词 + base64 图片，走 `/api/chat` 非流式接口。
//! 大图在发送前按最长边缩放，减少本地推理耗时。

use super::backend::{truncate_body, BackendKind, DescribeBackend, InferenceResult};
use crate::error::DescribeError;
use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::io::Cursor;
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 本地守护进程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// 主机（可带 http:// 前缀）
    #[serde(default = "default_host")]
    pub host: String,
    /// 端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// 模型名称（如 llava 或 qwen2.5vl:3b）
    #[serde(default = "default_model")]
    pub model: String,
    /// 提示词
    #[serde(default = "default_prompt")]
    pub prompt: String,
    /// 发送前图片最长边（像素），0 表示不缩放
    #[serde(default = "default_max_image_edge")]
    pub max_image_edge: u32,
    /// 请求超时（秒）
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    11434
}

fn default_model() -> String {
    "llava".to_string()
}

fn default_prompt() -> String {
    "Describe this image in one short sentence suitable for use as HTML alt text. \
     Reply with the sentence only."
        .to_string()
}

fn default_max_image_edge() -> u32 {
    1024
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            model: default_model(),
            prompt: default_prompt(),
            max_image_edge: default_max_image_edge(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl OllamaConfig {
    /// 守护进程基础 URL
    ///
    /// host 可以是 `127.0.0.1`、`0.0.0.0:11434`、`http://gpu-box:8080` 或 `::1`，
    /// 只有 host 未带端口时才使用 `port`。
    pub fn base_url(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        let with_scheme = if host.contains("://") {
            host.to_string()
        } else if host.parse::<Ipv6Addr>().is_ok() {
            format!("http://[{}]", host)
        } else {
            format!("http://{}", host)
        };

        let mut url = match Url::parse(&with_scheme) {
            Ok(url) => url,
            Err(e) => {
                warn!("Invalid Ollama host '{}': {}", self.host, e);
                return with_scheme;
            }
        };
        if !has_explicit_port(&with_scheme) && url.set_port(Some(self.port)).is_err() {
            warn!("Cannot apply port {} to Ollama host '{}'", self.port, self.host);
        }
        url.as_str().trim_end_matches('/').to_string()
    }
}

/// authority 部分是否写了端口（`Url::port` 会把默认端口归一为 None）
fn has_explicit_port(url: &str) -> bool {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split('/').next().unwrap_or(rest);
    authority
        .rsplit_once(':')
        .is_some_and(|(_, port)| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// 本地守护进程适配器
pub struct LocalDaemonAdapter {
    config: OllamaConfig,
    client: reqwest::Client,
}

impl LocalDaemonAdapter {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    /// 调用 `/api/chat`
    async fn call_api(&self, image: &[u8]) -> Result<String, DescribeError> {
        let image = Self::prepare_image(image, self.config.max_image_edge);
        let image_base64 = BASE64.encode(&image);

        let request = serde_json::json!({
            "model": self.config.model,
            "messages": [{
                "role": "user",
                "content": self.config.prompt,
                "images": [image_base64]
            }],
            "stream": false
        });

        let url = format!("{}/api/chat", self.config.base_url());

        info!(
            "Ollama API Request: endpoint={}, model={}, image_size={}KB",
            url,
            self.config.model,
            image_base64.len() / 1024
        );

        let start_time = Instant::now();

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!("Ollama API request failed: {}", e);
                DescribeError::from_transport(&e)
            })?;

        let status = response.status();
        info!(
            "Ollama API Response: status={}, elapsed={:.2}s",
            status,
            start_time.elapsed().as_secs_f64()
        );

        let body = response
            .text()
            .await
            .map_err(|e| DescribeError::from_transport(&e))?;

        if !status.is_success() {
            warn!("Ollama API Error: status={}, body={}", status, body);
            return Err(Self::classify_error(status, &body, &self.config.model));
        }

        Self::parse_response(&body)
    }

    /// 严格解析 `{"message": {"content": "..."}}`
    fn parse_response(body: &str) -> Result<String, DescribeError> {
        let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
            debug!("Raw: {}", body);
            DescribeError::backend(format!("unexpected Ollama response format: {}", e))
        })?;
        debug!(
            "Ollama API Response content length: {} chars",
            parsed.message.content.len()
        );
        Ok(parsed.message.content)
    }

    /// 非成功状态的分类：404 或 "model ... not found" 视为模型未安装
    fn classify_error(status: StatusCode, body: &str, model: &str) -> DescribeError {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.error)
            .unwrap_or_else(|_| truncate_body(body));

        let lower = message.to_lowercase();
        if status == StatusCode::NOT_FOUND || (lower.contains("model") && lower.contains("not found"))
        {
            DescribeError::model_not_found(format!("model '{}' is not installed: {}", model, message))
        } else {
            DescribeError::backend(format!("API error {}: {}", status, message))
        }
    }

    /// 模型是否在已安装列表中（允许省略 `:latest`）
    fn has_model(tags: &TagsResponse, model: &str) -> bool {
        tags.models
            .iter()
            .any(|m| m.name == model || m.name == format!("{}:latest", model))
    }

    /// 缩放过大的图片，无法解码时原样发送
    fn prepare_image(image: &[u8], max_edge: u32) -> Cow<'_, [u8]> {
        if max_edge == 0 {
            return Cow::Borrowed(image);
        }

        let decoded = match image::load_from_memory(image) {
            Ok(img) => img,
            Err(e) => {
                debug!("Image not decodable locally ({}), sending raw bytes", e);
                return Cow::Borrowed(image);
            }
        };

        if decoded.width() <= max_edge && decoded.height() <= max_edge {
            return Cow::Borrowed(image);
        }

        let resized = decoded.resize(max_edge, max_edge, image::imageops::FilterType::Triangle);
        let mut buffer = Cursor::new(Vec::new());
        match resized.write_to(&mut buffer, image::ImageFormat::Png) {
            Ok(()) => {
                debug!(
                    "Image resized: {}x{} -> {}x{}",
                    decoded.width(),
                    decoded.height(),
                    resized.width(),
                    resized.height()
                );
                Cow::Owned(buffer.into_inner())
            }
            Err(e) => {
                warn!("Failed to re-encode resized image: {}", e);
                Cow::Borrowed(image)
            }
        }
    }
}

#[async_trait::async_trait]
impl DescribeBackend for LocalDaemonAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalDaemon
    }

    fn backend_name(&self) -> String {
        format!("Ollama ({}, model {})", self.config.base_url(), self.config.model)
    }

    /// 验证守护进程可达且模型已安装
    async fn preflight(&self) -> Result<(), DescribeError> {
        let url = format!("{}/api/tags", self.config.base_url());
        debug!("Ollama preflight: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DescribeError::from_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DescribeError::backend(format!(
                "model list request failed with {}",
                status
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| DescribeError::backend(format!("unexpected model list format: {}", e)))?;

        if !Self::has_model(&tags, &self.config.model) {
            return Err(DescribeError::model_not_found(format!(
                "model '{}' is not installed (run `ollama pull {}`)",
                self.config.model, self.config.model
            )));
        }

        info!("Ollama daemon is ready");
        Ok(())
    }

    async fn describe(&self, image: &[u8]) -> InferenceResult {
        match self.call_api(image).await {
            Ok(text) => InferenceResult::from_text(&text, self.kind()),
            Err(e) => e.into(),
        }
    }
}
