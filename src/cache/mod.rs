//! 结果缓存模块
//!
//! 以图片名称为键的内存缓存，保持插入顺序，供导出、HTML 改写等下游读取。
//! 每次处理运行先写入独立的暂存表，完成后整体替换可见内容，
//! 读取方只会看到运行前或运行完成后的状态。

use crate::ai::BackendKind;
use crate::error::{DescribeError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info};

/// 缓存条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// 图片名称（缓存键）
    pub name: String,
    /// 本地路径或 URL
    pub locator: String,
    /// 生成的描述；失败时为错误标记
    pub description: String,
    /// 本次运行使用的后端
    pub backend: BackendKind,
    /// 失败原因，成功时为 None
    #[serde(default)]
    pub failure: Option<ErrorKind>,
    /// 处理时间
    pub processed_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn success(
        name: impl Into<String>,
        locator: impl Into<String>,
        description: impl Into<String>,
        backend: BackendKind,
    ) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
            description: description.into(),
            backend,
            failure: None,
            processed_at: Utc::now(),
        }
    }

    pub fn failure(
        name: impl Into<String>,
        locator: impl Into<String>,
        error: &DescribeError,
        backend: BackendKind,
    ) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
            description: error.marker(),
            backend,
            failure: Some(error.kind),
            processed_at: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// 有序表：位置取首次插入，内容取最后一次写入
#[derive(Debug, Clone, Default)]
struct CacheTable {
    entries: Vec<CacheEntry>,
    index: HashMap<String, usize>,
}

impl CacheTable {
    fn put(&mut self, entry: CacheEntry) {
        match self.index.get(&entry.name) {
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.index.insert(entry.name.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    fn get(&self, name: &str) -> Option<&CacheEntry> {
        self.index.get(name).map(|&pos| &self.entries[pos])
    }

    fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}

/// 单次运行的暂存区
#[derive(Debug, Default)]
pub struct CacheStage {
    table: CacheTable,
}

impl CacheStage {
    /// 写入（同名覆盖）
    pub fn put(&mut self, entry: CacheEntry) {
        self.table.put(entry);
    }

    pub fn len(&self) -> usize {
        self.table.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.entries.is_empty()
    }
}

/// 结果缓存
#[derive(Debug, Default)]
pub struct ResultCache {
    inner: RwLock<CacheTable>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始一次运行，返回空的暂存区
    pub fn begin_run(&self) -> CacheStage {
        CacheStage::default()
    }

    /// 用暂存区整体替换可见内容，返回有序名称列表
    pub fn commit(&self, stage: CacheStage) -> Vec<String> {
        let names = stage.table.names();
        let mut table = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let before = table.entries.len();
        *table = stage.table;
        info!("Cache replaced: {} -> {} entries", before, names.len());
        names
    }

    /// 写入可见缓存（同名覆盖）
    pub fn put(&self, entry: CacheEntry) {
        debug!("Cache put: {}", entry.name);
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .put(entry);
    }

    /// 清空缓存
    pub fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!("Result cache cleared");
    }

    /// 按插入顺序列出全部条目
    pub fn list(&self) -> Vec<CacheEntry> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<CacheEntry> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
