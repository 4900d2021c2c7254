use futures_util::future::join_all;
use tokio::task::JoinHandle;

use crate::link_cache::{EntryRef, LinkCache};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchReport {
    pub checked: usize,
    pub fresh: usize,
    pub refreshed: usize,
    pub failed: usize,
}

enum Outcome {
    Fresh,
    Refreshed,
    Failed,
}

/// 预热队首几项的链接；只碰缓存，不动协调器状态
#[derive(Clone)]
pub struct Prefetcher {
    cache: LinkCache,
    window: usize,
}

impl Prefetcher {
    pub fn new(cache: LinkCache, window: usize) -> Self {
        Self { cache, window }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn spawn_warm(&self, entries: Vec<EntryRef>) -> JoinHandle<PrefetchReport> {
        let this = self.clone();
        tokio::spawn(async move { this.warm(entries).await })
    }

    /// 并发探测，失效的刷新；所有错误只记日志
    pub async fn warm(&self, entries: Vec<EntryRef>) -> PrefetchReport {
        let jobs = entries.into_iter().take(self.window).map(|entry| {
            let cache = self.cache.clone();
            async move {
                let url = entry.metadata().stream_url;
                if cache.is_link_valid(&url).await {
                    return Outcome::Fresh;
                }
                match cache.refresh(&entry).await {
                    Ok(_) => Outcome::Refreshed,
                    Err(e) => {
                        tracing::debug!(canonical_id = entry.canonical_id(), err = %e, "预取刷新失败");
                        Outcome::Failed
                    }
                }
            }
        });

        let mut report = PrefetchReport::default();
        for outcome in join_all(jobs).await {
            report.checked += 1;
            match outcome {
                Outcome::Fresh => report.fresh += 1,
                Outcome::Refreshed => report.refreshed += 1,
                Outcome::Failed => report.failed += 1,
            }
        }
        if report.checked > 0 {
            tracing::debug!(
                checked = report.checked,
                refreshed = report.refreshed,
                failed = report.failed,
                "预取完成"
            );
        }
        report
    }
}
