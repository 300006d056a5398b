//! 表格导入导出（CSV）
//!
//! 读取：按表头定位名称列与路径列，其余列忽略；缺字段的行交给解析器计为格式错误。
//! 单元格内容不做裁剪，名称原样往返。
//! 写出：每个缓存条目一行，表头包含路径列，因此导出文件可直接作为清单重新导入。

use crate::cache::CacheEntry;
use crate::source::ManifestRow;
use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// 导出表头
pub const EXPORT_HEADERS: [&str; 4] = ["Image Filename", "Image Path", "Alt Tag", "Backend"];

const NAME_HEADERS: &[&str] = &["image name", "image filename", "name", "filename"];
const LOCATOR_HEADERS: &[&str] = &["image path", "path", "locator", "url"];

fn find_column(headers: &csv::StringRecord, candidates: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| candidates.contains(&h.trim().to_lowercase().as_str()))
}

/// 读取清单
pub fn read_manifest<R: Read>(reader: R) -> Result<Vec<ManifestRow>> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let name_col = find_column(&headers, NAME_HEADERS)
        .ok_or_else(|| anyhow!("Manifest has no image name column (expected 'Image Name')"))?;
    let locator_col = find_column(&headers, LOCATOR_HEADERS)
        .ok_or_else(|| anyhow!("Manifest has no image path column (expected 'Image Path')"))?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(ManifestRow {
            name: record.get(name_col).unwrap_or_default().to_string(),
            locator: record.get(locator_col).unwrap_or_default().to_string(),
        });
    }

    debug!("Manifest read: {} rows", rows.len());
    Ok(rows)
}

/// 从文件读取清单
pub fn read_manifest_file(path: &Path) -> Result<Vec<ManifestRow>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open manifest {}", path.display()))?;
    read_manifest(file).with_context(|| format!("Failed to parse manifest {}", path.display()))
}

/// 写出缓存条目
pub fn write_entries<W: Write>(writer: W, entries: &[CacheEntry]) -> Result<()> {
    let mut writer = WriterBuilder::new().from_writer(writer);
    writer.write_record(EXPORT_HEADERS)?;
    for entry in entries {
        writer.write_record([
            entry.name.as_str(),
            entry.locator.as_str(),
            entry.description.trim(),
            entry.backend.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// 写出到文件
pub fn write_entries_file(path: &Path, entries: &[CacheEntry]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create spreadsheet {}", path.display()))?;
    write_entries(file, entries)?;
    info!("Exported {} entries to {}", entries.len(), path.display());
    Ok(())
}
