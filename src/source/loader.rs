//! 图片字节加载
//!
//! 本地路径直接读取文件，远程 URL 通过 HTTP GET 获取。
//! 任何失败都归为 LoadError，由流水线记录到对应图片名下。

use super::{ImageRef, Origin};
use crate::error::DescribeError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// 图片加载器
#[async_trait]
pub trait ImageLoader: Send + Sync {
    async fn load(&self, image: &ImageRef) -> Result<Vec<u8>, DescribeError>;
}

/// 默认加载器：文件系统 + reqwest
pub struct HttpImageLoader {
    client: reqwest::Client,
}

impl HttpImageLoader {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DescribeError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DescribeError::load(format!("failed to fetch {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DescribeError::load(format!("GET {} returned {}", url, status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DescribeError::load(format!("failed to read body of {}: {}", url, e)))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageLoader for HttpImageLoader {
    async fn load(&self, image: &ImageRef) -> Result<Vec<u8>, DescribeError> {
        let bytes = match image.origin {
            Origin::LocalPath => tokio::fs::read(&image.locator).await.map_err(|e| {
                DescribeError::load(format!("cannot read {}: {}", image.locator, e))
            })?,
            Origin::RemoteUrl => self.fetch(&image.locator).await?,
        };

        if bytes.is_empty() {
            return Err(DescribeError::load(format!("{} is empty", image.locator)));
        }

        debug!("Loaded {}: {} bytes", image.name, bytes.len());
        Ok(bytes)
    }
}
