//! 缓存统计与批量校验

use std::time::Duration;

use crate::domain::{Reference, is_url};

use super::{CacheRecord, EntryRef, LinkCache};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_keys: usize,
    pub url_keys: usize,
    pub search_keys: usize,
    /// 只统计时长大于 0 的条目
    pub total_duration_secs: u64,
    pub avg_duration_secs: f64,
    pub avg_search_keys_per_entry: f64,
}

impl CacheStats {
    pub fn from_records(records: &[CacheRecord]) -> Self {
        let mut stats = Self {
            entries: records.len(),
            ..Self::default()
        };
        let mut timed = 0usize;
        for record in records {
            stats.total_keys += record.keys.len();
            let urls = record.keys.iter().filter(|k| is_url(k)).count();
            stats.url_keys += urls;
            stats.search_keys += record.keys.len() - urls;
            if record.duration > 0 {
                stats.total_duration_secs += record.duration;
                timed += 1;
            }
        }
        if timed > 0 {
            stats.avg_duration_secs = stats.total_duration_secs as f64 / timed as f64;
        }
        if stats.entries > 0 {
            stats.avg_search_keys_per_entry = stats.search_keys as f64 / stats.entries as f64;
        }
        stats
    }
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// 重新搜索每个非链接别名，看首个结果是否还是同一视频
    pub check_search_keys: bool,
    /// 删除无法解析或搜索结果不一致的条目
    pub prune_invalid: bool,
    pub entry_delay: Duration,
    pub search_delay: Duration,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            check_search_keys: false,
            prune_invalid: false,
            entry_delay: Duration::from_millis(700),
            search_delay: Duration::from_millis(900),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub checked: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// 无法解析的条目 canonical id
    pub invalid: Vec<String>,
    pub pruned: usize,
    pub search_keys_checked: usize,
    /// (别名, 原 canonical id, 搜索结果 canonical id)
    pub search_mismatches: Vec<(String, String, String)>,
    /// (别名, 错误信息)：重新搜索本身失败
    pub search_errors: Vec<(String, String)>,
}

impl VerifyReport {
    /// 需要删除的条目：无法解析的，加上有搜索别名不一致的
    pub fn flagged(&self) -> Vec<String> {
        let mut ids = self.invalid.clone();
        for (_, canonical_id, _) in &self.search_mismatches {
            if !ids.contains(canonical_id) {
                ids.push(canonical_id.clone());
            }
        }
        ids
    }
}

impl LinkCache {
    pub fn stats(&self) -> CacheStats {
        CacheStats::from_records(&self.records())
    }

    /// 逐个重新解析所有条目；调用之间按固定间隔限速
    pub async fn verify(&self, opts: &VerifyOptions) -> VerifyReport {
        let mut report = VerifyReport::default();
        let entries = self.entries();

        for (i, entry) in entries.iter().enumerate() {
            if i > 0 && !opts.entry_delay.is_zero() {
                tokio::time::sleep(opts.entry_delay).await;
            }
            report.checked += 1;
            self.verify_entry(entry, &mut report).await;
        }

        if opts.check_search_keys {
            for entry in &entries {
                if report.invalid.iter().any(|id| id == entry.canonical_id()) {
                    continue;
                }
                self.verify_search_keys(entry, opts.search_delay, &mut report)
                    .await;
            }
        }

        if opts.prune_invalid {
            for canonical_id in &report.flagged() {
                if self.inner.index.lock().remove(canonical_id).is_some() {
                    report.pruned += 1;
                }
            }
        }

        if report.updated > 0 || report.pruned > 0 {
            self.persist().await;
        }
        tracing::info!(
            checked = report.checked,
            updated = report.updated,
            invalid = report.invalid.len(),
            pruned = report.pruned,
            mismatches = report.search_mismatches.len(),
            search_errors = report.search_errors.len(),
            "缓存校验完成"
        );
        report
    }

    async fn verify_entry(&self, entry: &EntryRef, report: &mut VerifyReport) {
        let before = entry.metadata();
        let reference = Reference::Url(entry.canonical_id().to_owned());
        match self.resolver().resolve(&reference).await {
            Ok(fresh) => {
                let changed = fresh.stream_url != before.stream_url
                    || fresh.title != before.title
                    || fresh.uploader != before.uploader
                    || fresh.duration_secs != before.duration_secs;
                entry.replace_metadata(fresh);
                if changed {
                    report.updated += 1;
                } else {
                    report.unchanged += 1;
                }
            }
            Err(e) => {
                tracing::warn!(canonical_id = entry.canonical_id(), err = %e, "条目校验失败");
                report.invalid.push(entry.canonical_id().to_owned());
            }
        }
    }

    async fn verify_search_keys(
        &self,
        entry: &EntryRef,
        delay: Duration,
        report: &mut VerifyReport,
    ) {
        let keys: Vec<String> = entry.aliases().into_iter().filter(|k| !is_url(k)).collect();
        for key in keys {
            if report.search_keys_checked > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            report.search_keys_checked += 1;
            match self.resolver().resolve(&Reference::Search(key.clone())).await {
                Ok(top) if top.canonical_id != entry.canonical_id() => {
                    tracing::info!(alias = %key, expected = entry.canonical_id(), got = %top.canonical_id, "搜索结果已变化");
                    report.search_mismatches.push((
                        key,
                        entry.canonical_id().to_owned(),
                        top.canonical_id,
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(alias = %key, err = %e, "搜索别名校验失败");
                    report.search_errors.push((key, e.to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(keys: &[&str], duration: u64) -> CacheRecord {
        CacheRecord {
            keys: keys.iter().map(|k| (*k).to_owned()).collect(),
            url: "u".to_owned(),
            webpage_url: "w".to_owned(),
            title: "t".to_owned(),
            duration,
            uploader: String::new(),
            resolved_at: None,
        }
    }

    #[test]
    fn stats_split_url_and_search_keys() {
        let records = vec![
            record(&["rickroll", "https://youtu.be/dQw4w9WgXcQ"], 212),
            record(&["lofi", "lo fi beats", "study"], 0),
        ];
        let stats = CacheStats::from_records(&records);
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.total_keys, 5);
        assert_eq!(stats.url_keys, 1);
        assert_eq!(stats.search_keys, 4);
        assert_eq!(stats.total_duration_secs, 212);
        assert_eq!(stats.avg_duration_secs, 212.0);
        assert_eq!(stats.avg_search_keys_per_entry, 2.0);
    }

    #[test]
    fn flagged_merges_invalid_and_mismatched_once() {
        let report = VerifyReport {
            invalid: vec!["c".to_owned()],
            search_mismatches: vec![
                ("alpha".to_owned(), "a".to_owned(), "z".to_owned()),
                ("alpha live".to_owned(), "a".to_owned(), "y".to_owned()),
            ],
            ..VerifyReport::default()
        };
        assert_eq!(report.flagged(), vec!["c".to_owned(), "a".to_owned()]);
    }

    #[test]
    fn stats_of_empty_cache_are_zero() {
        let stats = CacheStats::from_records(&[]);
        assert_eq!(stats, CacheStats::default());
    }
}
