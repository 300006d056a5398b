//! 命令处理模块
//!
//! 命令行各子命令的实现：触发一次运行，然后从缓存导出或改写 HTML。

use crate::cache::CacheEntry;
use crate::config::AppConfig;
use crate::pipeline::RunSummary;
use crate::AppState;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 运行结束后的输出选项
#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    /// 导出 CSV 的路径
    pub export: Option<PathBuf>,
    /// 需要注入 alt 的 HTML 文件
    pub patch: Option<PathBuf>,
    /// 改写后的 HTML 输出路径（默认覆盖原文件）
    pub patch_out: Option<PathBuf>,
    /// 以 JSON 输出
    pub json: bool,
}

/// 扫描目录
pub async fn refresh(state: &AppState, dir: Option<&Path>) -> Result<RunSummary> {
    let summary = match dir {
        Some(dir) => state.refresh_dir(dir).await?,
        None => state.refresh().await?,
    };
    Ok(summary)
}

/// 处理清单文件
pub async fn process(state: &AppState, manifest: &Path) -> Result<RunSummary> {
    info!("Processing manifest {}", manifest.display());
    state.process_manifest_file(manifest).await
}

/// 处理单张图片
pub async fn describe(state: &AppState, name: Option<&str>, locator: &str) -> Result<RunSummary> {
    Ok(state.process_single(name, locator).await?)
}

/// 输出运行结果并执行导出
pub fn finish(state: &AppState, summary: &RunSummary, options: &OutputOptions) -> Result<()> {
    let entries = state.entries();

    if options.json {
        let payload = serde_json::json!({
            "summary": summary,
            "entries": entries,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_entries(&entries);
        println!("{}", summary.notice());
    }

    if let Some(path) = &options.export {
        let rows = state.export_spreadsheet(path)?;
        eprintln!("Exported {} rows to {}", rows, path.display());
    }

    if let Some(path) = &options.patch {
        patch_file(state, path, options.patch_out.as_deref())?;
    }

    Ok(())
}

/// 改写 HTML 文件
pub fn patch_file(state: &AppState, input: &Path, output: Option<&Path>) -> Result<()> {
    let html = fs::read_to_string(input)
        .with_context(|| format!("Failed to read HTML document {}", input.display()))?;
    let report = state.patch_html(&html);

    let output = output.unwrap_or(input);
    fs::write(output, &report.html)
        .with_context(|| format!("Failed to write HTML document {}", output.display()))?;

    eprintln!(
        "Updated {} image tags in {}",
        report.patched_tags,
        output.display()
    );
    for name in &report.unmatched {
        warn!("No <img> tag matched cached image {}", name);
        eprintln!("  unmatched: {}", name);
    }
    for name in &report.failure_markers {
        eprintln!("  generation failed, marker written: {}", name);
    }
    Ok(())
}

/// 打印缓存条目
pub fn print_entries(entries: &[CacheEntry]) {
    if entries.is_empty() {
        println!("No images found.");
        return;
    }
    let width = entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
    for entry in entries {
        println!("{:width$}  {}", entry.name, entry.description, width = width);
    }
}

/// 当前生效配置（隐藏 API 密钥）
pub fn show_config(config: &AppConfig) -> Result<String> {
    let mut masked = config.clone();
    if let Some(key) = masked.huggingface.api_key.as_mut() {
        let prefix: String = key.chars().take(4).collect();
        *key = format!("{}…", prefix);
    }
    debug!("Rendering config");
    Ok(toml::to_string_pretty(&masked)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_config_masks_key() {
        let mut config = AppConfig::default();
        config.huggingface.api_key = Some("hf_secret_value".to_string());
        let rendered = show_config(&config).unwrap();
        assert!(rendered.contains("hf_s…"));
        assert!(!rendered.contains("secret"));
    }
}
