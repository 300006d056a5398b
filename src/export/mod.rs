//! 导出模块
//!
//! 只读取缓存的公开接口：表格导入导出与 HTML alt 注入。

pub mod html;
pub mod spreadsheet;

pub use html::{patch_html, PatchReport};
pub use spreadsheet::{read_manifest, read_manifest_file, write_entries, write_entries_file};
