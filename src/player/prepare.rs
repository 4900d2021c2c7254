use std::sync::Arc;

use crate::domain::TrackMetadata;
use crate::error::PrepareError;
use crate::link_cache::{EntryRef, LinkCache};

/// 准备好可以交给输出端的条目
#[derive(Debug, Clone)]
pub(super) struct Prepared {
    /// 回退搜索命中别的视频时与入队条目不同
    pub entry: EntryRef,
    pub metadata: TrackMetadata,
}

/// 校验链接 -> 失效则刷新 -> 刷新失败则按标题回退搜索
pub(super) async fn prepare_entry(
    cache: &LinkCache,
    entry: EntryRef,
) -> Result<Prepared, PrepareError> {
    let meta = entry.metadata();
    if cache.is_link_valid(&meta.stream_url).await {
        return Ok(Prepared {
            entry,
            metadata: meta,
        });
    }
    tracing::info!(canonical_id = entry.canonical_id(), "链接已失效，尝试刷新");

    let refresh = match cache.refresh(&entry).await {
        Ok(fresh) => {
            return Ok(Prepared {
                entry,
                metadata: fresh,
            });
        }
        Err(e) => e,
    };

    match cache.fallback(&entry).await {
        Ok(found) => {
            let metadata = found.metadata();
            if !Arc::ptr_eq(&found, &entry) {
                tracing::info!(
                    from = entry.canonical_id(),
                    to = found.canonical_id(),
                    "改播回退搜索结果"
                );
            }
            Ok(Prepared {
                entry: found,
                metadata,
            })
        }
        Err(fallback) => Err(PrepareError::Unplayable { refresh, fallback }),
    }
}
