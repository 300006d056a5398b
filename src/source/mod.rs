//! 图片来源解析模块
//!
//! 支持三种输入：
//! - 目录扫描：列出固定目录下的图片文件（不递归）
//! - 清单：表格中声明的 (名称, 路径或 URL) 列表
//! - 单张：外部指定的一张图片
//!
//! 解析阶段除目录列举外不做 I/O，图片字节由流水线逐张加载。

pub mod loader;

pub use loader::{HttpImageLoader, ImageLoader};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

/// 支持的图片扩展名（不区分大小写）
pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

/// 图片来源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    LocalPath,
    RemoteUrl,
}

/// 解析后的图片引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// 显示名称，同时作为缓存键
    pub name: String,
    pub origin: Origin,
    /// 本地路径或 URL
    pub locator: String,
}

impl ImageRef {
    pub fn new(name: impl Into<String>, locator: impl Into<String>) -> Self {
        let locator = locator.into();
        Self {
            name: name.into(),
            origin: classify_locator(&locator),
            locator,
        }
    }
}

/// 清单中的一行（可能缺字段）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestRow {
    pub name: String,
    pub locator: String,
}

impl ManifestRow {
    pub fn new(name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
        }
    }
}

/// 解析结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSources {
    pub images: Vec<ImageRef>,
    /// 被跳过的格式错误清单行数
    pub skipped_malformed: usize,
}

impl ResolvedSources {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// 判断定位符是远程 URL 还是本地路径
pub fn classify_locator(locator: &str) -> Origin {
    match Url::parse(locator.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Origin::RemoteUrl,
        _ => Origin::LocalPath,
    }
}

/// 是否为支持的图片扩展名
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// 目录模式：按文件名排序，目录不存在时返回空序列
pub fn scan_directory(dir: &Path) -> io::Result<ResolvedSources> {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("Image directory not found: {}", dir.display());
            return Ok(ResolvedSources::default());
        }
        Err(e) => return Err(e),
    };

    let mut images = Vec::new();
    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        // 跟随符号链接
        if !path.is_file() || !has_image_extension(&path) {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!("Skipping non UTF-8 file name: {}", path.display());
            continue;
        };
        images.push(ImageRef {
            name: name.to_string(),
            origin: Origin::LocalPath,
            locator: path.to_string_lossy().into_owned(),
        });
    }
    images.sort_by(|a, b| a.name.cmp(&b.name));

    info!("Scanned {}: {} images", dir.display(), images.len());
    Ok(ResolvedSources {
        images,
        skipped_malformed: 0,
    })
}

/// 清单模式：保持行顺序，缺少名称或路径的行跳过并计数；名称原样保留
pub fn resolve_manifest<I>(rows: I) -> ResolvedSources
where
    I: IntoIterator<Item = ManifestRow>,
{
    let mut resolved = ResolvedSources::default();

    for (line, row) in rows.into_iter().enumerate() {
        let locator = row.locator.trim();
        if row.name.trim().is_empty() || locator.is_empty() {
            debug!("Skipping malformed manifest row {}: {:?}", line + 1, row);
            resolved.skipped_malformed += 1;
            continue;
        }
        resolved.images.push(ImageRef::new(row.name.as_str(), locator));
    }

    if resolved.skipped_malformed > 0 {
        warn!(
            "Manifest resolved: {} images, {} malformed rows skipped",
            resolved.images.len(),
            resolved.skipped_malformed
        );
    }
    resolved
}

/// 单张模式；未给出名称时取路径或 URL 的最后一段
pub fn resolve_single(name: Option<&str>, locator: &str) -> ResolvedSources {
    let locator = locator.trim();
    let name = name
        .filter(|n| !n.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| derive_name(locator));

    resolve_manifest([ManifestRow::new(name, locator)])
}

/// 从定位符推导显示名称
pub fn derive_name(locator: &str) -> String {
    if let Ok(url) = Url::parse(locator) {
        if matches!(url.scheme(), "http" | "https") {
            if let Some(seg) = url
                .path_segments()
                .and_then(|mut s| s.next_back())
                .filter(|s| !s.is_empty())
            {
                return seg.to_string();
            }
            return url.host_str().unwrap_or(locator).to_string();
        }
    }
    Path::new(locator)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(locator)
        .to_string()
}
