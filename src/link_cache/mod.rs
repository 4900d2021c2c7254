//! 流媒体链接缓存
//!
//! 一个条目对应一个 canonical id，可以挂多个别名（原始链接、规范链接、小写搜索词）。
//! 别名索引由一把短时持有的互斥锁保护，条目元数据各自带读写锁，任何锁都不跨 `.await`。
//!
//! 同一条目的并发刷新、同一别名的并发首次解析都只调用一次解析器，
//! 所有等待者拿到同一个结果。

mod probe;
mod stats;
mod store;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::{Mutex, RwLock};

use crate::domain::{Reference, TrackMetadata, canonical_url, normalize_alias};
use crate::error::{CacheError, ResolveError};
use crate::resolver::Resolver;

pub use probe::{HttpProbe, LinkProbe};
pub use stats::{CacheStats, VerifyOptions, VerifyReport};
pub use store::{
    CacheRecord, CacheStore, ParsedRecords, SkippedRecord, parse_import, parse_records,
    write_atomic,
};

pub type EntryRef = Arc<CacheEntry>;

type Flight<T> = Shared<BoxFuture<'static, Result<T, ResolveError>>>;

#[derive(Debug)]
struct EntryState {
    meta: TrackMetadata,
    aliases: Vec<String>,
}

/// 缓存条目；canonical id 创建后不变
#[derive(Debug)]
pub struct CacheEntry {
    canonical_id: String,
    state: RwLock<EntryState>,
}

impl CacheEntry {
    pub(crate) fn new(meta: TrackMetadata) -> Self {
        Self {
            canonical_id: meta.canonical_id.clone(),
            state: RwLock::new(EntryState {
                meta,
                aliases: Vec::new(),
            }),
        }
    }

    pub fn canonical_id(&self) -> &str {
        &self.canonical_id
    }

    /// 当前元数据的快照
    pub fn metadata(&self) -> TrackMetadata {
        self.state.read().meta.clone()
    }

    pub fn title(&self) -> String {
        self.state.read().meta.title.clone()
    }

    pub fn aliases(&self) -> Vec<String> {
        self.state.read().aliases.clone()
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.state.read().aliases.iter().any(|a| a == alias)
    }

    fn replace_metadata(&self, mut meta: TrackMetadata) {
        meta.canonical_id.clone_from(&self.canonical_id);
        self.state.write().meta = meta;
    }

    fn push_alias(&self, alias: String) {
        let mut state = self.state.write();
        if !state.aliases.contains(&alias) {
            state.aliases.push(alias);
        }
    }

    fn remove_alias(&self, alias: &str) {
        self.state.write().aliases.retain(|a| a != alias);
    }

    fn to_record(&self) -> CacheRecord {
        let state = self.state.read();
        CacheRecord::from_parts(&state.meta, state.aliases.clone())
    }
}

#[derive(Default)]
struct Index {
    entries: Vec<EntryRef>,
    by_canonical: HashMap<String, EntryRef>,
    by_alias: HashMap<String, EntryRef>,
}

impl Index {
    fn from_records(records: Vec<CacheRecord>) -> Self {
        let mut index = Self::default();
        for record in records {
            index.merge_record(record);
        }
        index
    }

    /// 已知 canonical id 就原地更新，返回 (条目, 是否新建)
    fn upsert(&mut self, meta: TrackMetadata) -> (EntryRef, bool) {
        if let Some(existing) = self.by_canonical.get(&meta.canonical_id) {
            existing.replace_metadata(meta);
            return (Arc::clone(existing), false);
        }
        let entry = Arc::new(CacheEntry::new(meta));
        self.by_canonical
            .insert(entry.canonical_id.clone(), Arc::clone(&entry));
        self.entries.push(Arc::clone(&entry));
        (entry, true)
    }

    /// 别名只属于一个条目：已挂在别的条目上时先摘下来
    fn assign_alias(&mut self, alias: &str, entry: &EntryRef) {
        let alias = normalize_alias(alias);
        if alias.is_empty() {
            return;
        }
        if let Some(prev) = self.by_alias.get(&alias) {
            if Arc::ptr_eq(prev, entry) {
                return;
            }
            tracing::debug!(
                alias = %alias,
                from = prev.canonical_id(),
                to = entry.canonical_id(),
                "别名改挂到新条目"
            );
            prev.remove_alias(&alias);
        }
        entry.push_alias(alias.clone());
        self.by_alias.insert(alias, Arc::clone(entry));
    }

    fn merge_record(&mut self, record: CacheRecord) -> bool {
        let (entry, created) = self.upsert(record.to_metadata());
        for key in &record.keys {
            self.assign_alias(key, &entry);
        }
        created
    }

    fn remove(&mut self, canonical_id: &str) -> Option<EntryRef> {
        let entry = self.by_canonical.remove(canonical_id)?;
        self.entries.retain(|e| !Arc::ptr_eq(e, &entry));
        for alias in entry.aliases() {
            self.by_alias.remove(&alias);
        }
        Some(entry)
    }

    fn records(&self) -> Vec<CacheRecord> {
        self.entries.iter().map(|e| e.to_record()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// None 表示纯内存缓存
    pub path: Option<PathBuf>,
    /// false 时跳过别名查找与持久化，解析结果仍会建条目以便刷新
    pub use_cache: bool,
}

/// 导入结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub created: usize,
    pub merged: usize,
    pub skipped: Vec<SkippedRecord>,
}

struct Inner {
    resolver: Arc<dyn Resolver>,
    probe: Arc<dyn LinkProbe>,
    store: Option<CacheStore>,
    use_cache: bool,
    index: Mutex<Index>,
    fetches: Mutex<HashMap<String, Flight<EntryRef>>>,
    refreshes: Mutex<HashMap<String, Flight<TrackMetadata>>>,
    write_lock: tokio::sync::Mutex<()>,
}

/// 可克隆的缓存句柄
#[derive(Clone)]
pub struct LinkCache {
    inner: Arc<Inner>,
}

impl LinkCache {
    /// 打开缓存文件；读不了或损坏时从空缓存开始
    pub fn open(
        opts: CacheOptions,
        resolver: Arc<dyn Resolver>,
        probe: Arc<dyn LinkProbe>,
    ) -> Self {
        let store = opts.path.filter(|_| opts.use_cache).map(CacheStore::new);
        let index = match store.as_ref() {
            Some(store) => Index::from_records(load_or_warn(store)),
            None => Index::default(),
        };
        tracing::info!(
            entries = index.entries.len(),
            aliases = index.by_alias.len(),
            use_cache = opts.use_cache,
            "链接缓存已加载"
        );
        Self {
            inner: Arc::new(Inner {
                resolver,
                probe,
                store,
                use_cache: opts.use_cache,
                index: Mutex::new(index),
                fetches: Mutex::new(HashMap::new()),
                refreshes: Mutex::new(HashMap::new()),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// 不落盘的缓存
    pub fn in_memory(resolver: Arc<dyn Resolver>, probe: Arc<dyn LinkProbe>) -> Self {
        Self::open(
            CacheOptions {
                path: None,
                use_cache: true,
            },
            resolver,
            probe,
        )
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.store.as_ref().map(CacheStore::path)
    }

    pub fn use_cache(&self) -> bool {
        self.inner.use_cache
    }

    pub fn lookup(&self, alias: &str) -> Option<EntryRef> {
        if !self.inner.use_cache {
            return None;
        }
        let alias = normalize_alias(alias);
        self.inner.index.lock().by_alias.get(&alias).cloned()
    }

    pub fn by_canonical(&self, canonical_id: &str) -> Option<EntryRef> {
        self.inner
            .index
            .lock()
            .by_canonical
            .get(canonical_id)
            .cloned()
    }

    pub fn entries(&self) -> Vec<EntryRef> {
        self.inner.index.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.index.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 命中别名直接返回；否则调用解析器，按 canonical id 合并并挂上别名
    pub async fn resolve_or_fetch(&self, reference: &Reference) -> Result<EntryRef, ResolveError> {
        let alias = reference.alias_key();
        let flight = {
            let mut fetches = self.inner.fetches.lock();
            if let Some(hit) = self.lookup(&alias) {
                tracing::debug!(alias = %alias, canonical_id = hit.canonical_id(), "缓存命中");
                return Ok(hit);
            }
            fetches
                .entry(alias.clone())
                .or_insert_with(|| {
                    let cache = self.clone();
                    let reference = reference.clone();
                    let key = alias.clone();
                    async move {
                        let result = cache.fetch_uncached(&reference, &key).await;
                        cache.inner.fetches.lock().remove(&key);
                        result
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };
        flight.await
    }

    async fn fetch_uncached(
        &self,
        reference: &Reference,
        alias: &str,
    ) -> Result<EntryRef, ResolveError> {
        tracing::info!(alias = %alias, "缓存未命中，开始解析");
        let meta = self.inner.resolver.resolve(reference).await?;
        let entry = {
            let mut index = self.inner.index.lock();
            let (entry, created) = index.upsert(meta);
            index.assign_alias(alias, &entry);
            if let Reference::Url(url) = reference
                && let Some(canonical) = canonical_url(url)
            {
                index.assign_alias(&canonical, &entry);
            }
            if let Some(canonical) = canonical_url(entry.canonical_id()) {
                index.assign_alias(&canonical, &entry);
            }
            tracing::debug!(canonical_id = entry.canonical_id(), created, "解析结果已合并");
            entry
        };
        self.persist().await;
        Ok(entry)
    }

    /// 按 canonical id 重新解析并原地更新；并发调用共享同一次解析
    pub async fn refresh(&self, entry: &EntryRef) -> Result<TrackMetadata, ResolveError> {
        let flight = {
            let mut refreshes = self.inner.refreshes.lock();
            refreshes
                .entry(entry.canonical_id().to_owned())
                .or_insert_with(|| {
                    let cache = self.clone();
                    let entry = Arc::clone(entry);
                    async move {
                        let result = cache.refresh_uncached(&entry).await;
                        cache.inner.refreshes.lock().remove(entry.canonical_id());
                        result
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };
        flight.await
    }

    async fn refresh_uncached(&self, entry: &EntryRef) -> Result<TrackMetadata, ResolveError> {
        tracing::info!(canonical_id = entry.canonical_id(), "刷新流媒体链接");
        let reference = Reference::Url(entry.canonical_id().to_owned());
        match self.inner.resolver.resolve(&reference).await {
            Ok(fresh) => {
                entry.replace_metadata(fresh);
                self.persist().await;
                Ok(entry.metadata())
            }
            Err(e) => {
                tracing::warn!(canonical_id = entry.canonical_id(), err = %e, "刷新失败");
                Err(e)
            }
        }
    }

    /// 用缓存里的标题重新搜索
    ///
    /// 搜到同一个视频时原地更新；搜到别的视频则作为独立条目合并返回，别名不动。
    pub async fn fallback(&self, entry: &EntryRef) -> Result<EntryRef, ResolveError> {
        let title = entry.title();
        tracing::info!(canonical_id = entry.canonical_id(), title = %title, "按标题回退搜索");
        let found = self
            .inner
            .resolver
            .resolve(&Reference::Search(title))
            .await?;

        let result = if found.canonical_id == entry.canonical_id() {
            entry.replace_metadata(found);
            Arc::clone(entry)
        } else {
            let mut index = self.inner.index.lock();
            let (other, created) = index.upsert(found);
            tracing::info!(
                from = entry.canonical_id(),
                to = other.canonical_id(),
                created,
                "回退搜索命中了另一个视频"
            );
            other
        };
        self.persist().await;
        Ok(result)
    }

    pub async fn is_link_valid(&self, url: &str) -> bool {
        self.inner.probe.is_valid(url).await
    }

    /// 手动绑定搜索词到指定视频
    pub async fn add_key(&self, query: &str, video_url: &str) -> Result<EntryRef, CacheError> {
        let canonical =
            canonical_url(video_url).ok_or_else(|| CacheError::InvalidUrl(video_url.to_owned()))?;
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Err(CacheError::Format("搜索词为空".to_owned()));
        }

        let meta = self
            .inner
            .resolver
            .resolve(&Reference::Url(canonical.clone()))
            .await?;
        let entry = {
            let mut index = self.inner.index.lock();
            let (entry, _) = index.upsert(meta);
            index.assign_alias(&query, &entry);
            index.assign_alias(&canonical, &entry);
            entry
        };
        tracing::info!(query = %query, canonical_id = entry.canonical_id(), "已添加别名");
        self.flush().await?;
        Ok(entry)
    }

    /// 导入记录数组：坏记录跳过并报告，其余按 canonical id 合并
    pub async fn import_records(&self, bytes: &[u8]) -> Result<ImportReport, CacheError> {
        let parsed = parse_import(bytes)?;
        let mut report = ImportReport {
            skipped: parsed.skipped,
            ..ImportReport::default()
        };
        {
            let mut index = self.inner.index.lock();
            for record in parsed.records {
                if index.merge_record(record) {
                    report.created += 1;
                } else {
                    report.merged += 1;
                }
            }
        }
        for skipped in &report.skipped {
            tracing::warn!(index = skipped.index, reason = %skipped.reason, "导入时跳过记录");
        }
        tracing::info!(
            created = report.created,
            merged = report.merged,
            skipped = report.skipped.len(),
            "导入完成"
        );
        self.flush().await?;
        Ok(report)
    }

    pub async fn export_to(&self, path: &Path) -> Result<usize, CacheError> {
        let records = self.records();
        let count = records.len();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || write_atomic(&path, &records))
            .await
            .map_err(|e| CacheError::Task(e.to_string()))??;
        Ok(count)
    }

    /// 丢弃内存中的条目，重新读盘
    pub async fn reload(&self) -> Result<usize, CacheError> {
        let Some(store) = self.inner.store.clone() else {
            return Ok(self.len());
        };
        let parsed = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| CacheError::Task(e.to_string()))??;
        let index = Index::from_records(parsed.records);
        let count = index.entries.len();
        *self.inner.index.lock() = index;
        tracing::info!(entries = count, "缓存已重新加载");
        Ok(count)
    }

    pub async fn remove_entry(&self, canonical_id: &str) -> Result<EntryRef, CacheError> {
        let removed = self.inner.index.lock().remove(canonical_id);
        let entry = removed.ok_or_else(|| CacheError::UnknownEntry(canonical_id.to_owned()))?;
        tracing::info!(canonical_id, aliases = entry.aliases().len(), "已删除缓存条目");
        self.flush().await?;
        Ok(entry)
    }

    pub fn records(&self) -> Vec<CacheRecord> {
        self.inner.index.lock().records()
    }

    /// 后台路径用：失败只记日志，内存状态不回滚
    pub async fn persist(&self) {
        if let Err(e) = self.flush().await {
            tracing::warn!(err = %e, "写入缓存文件失败，磁盘上保留旧版本");
        }
    }

    /// 串行写盘；快照在写锁内拍，保证最后一次写入就是最新状态
    pub async fn flush(&self) -> Result<(), CacheError> {
        let Some(store) = self.inner.store.clone() else {
            return Ok(());
        };
        let _guard = self.inner.write_lock.lock().await;
        let records = self.records();
        tokio::task::spawn_blocking(move || store.save(&records))
            .await
            .map_err(|e| CacheError::Task(e.to_string()))?
    }

    fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.inner.resolver
    }
}

fn load_or_warn(store: &CacheStore) -> Vec<CacheRecord> {
    match store.load() {
        Ok(parsed) => {
            for skipped in &parsed.skipped {
                tracing::warn!(
                    index = skipped.index,
                    reason = %skipped.reason,
                    "缓存文件中的记录无效，已跳过"
                );
            }
            parsed.records
        }
        Err(e) => {
            tracing::warn!(path = %store.path().display(), err = %e, "读取缓存文件失败，从空缓存开始");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str) -> TrackMetadata {
        TrackMetadata::new(
            format!("https://www.youtube.com/watch?v={id}"),
            format!("https://stream.example/{id}"),
            format!("title {id}"),
            "uploader",
            100,
        )
    }

    #[test]
    fn alias_moves_between_entries() {
        let mut index = Index::default();
        let (a, _) = index.upsert(meta("a"));
        let (b, _) = index.upsert(meta("b"));

        index.assign_alias("Shared Query", &a);
        assert!(a.has_alias("shared query"));

        index.assign_alias("shared query", &b);
        assert!(!a.has_alias("shared query"));
        assert!(b.has_alias("shared query"));
        assert!(Arc::ptr_eq(&index.by_alias["shared query"], &b));
    }

    #[test]
    fn upsert_same_canonical_updates_in_place() {
        let mut index = Index::default();
        let (first, created) = index.upsert(meta("a"));
        assert!(created);

        let mut fresh = meta("a");
        fresh.stream_url = "https://stream.example/new".to_owned();
        let (second, created) = index.upsert(fresh);
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.metadata().stream_url, "https://stream.example/new");
        assert_eq!(index.entries.len(), 1);
    }

    #[test]
    fn duplicate_records_merge_with_alias_union() {
        let rec = |keys: &[&str]| {
            CacheRecord::from_parts(&meta("a"), keys.iter().map(|k| (*k).to_owned()).collect())
        };
        let index = Index::from_records(vec![rec(&["x", "y"]), rec(&["y", "z"])]);
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.entries[0].aliases(), vec!["x", "y", "z"]);
    }

    #[test]
    fn remove_releases_aliases() {
        let mut index = Index::default();
        let (a, _) = index.upsert(meta("a"));
        index.assign_alias("q", &a);

        assert!(index.remove(a.canonical_id()).is_some());
        assert!(index.by_alias.is_empty());
        assert!(index.entries.is_empty());
        assert!(index.remove(a.canonical_id()).is_none());
    }
}
