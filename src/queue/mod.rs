//! 播放队列：待播列表 + 最近优先的历史

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;

use crate::domain::{Requester, TrackMetadata};
use crate::error::QueueError;
use crate::link_cache::EntryRef;

static NEXT_ITEM_ID: AtomicU64 = AtomicU64::new(1);

/// 队列中的一项；多个队列项可以共享同一个缓存条目
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: u64,
    pub entry: EntryRef,
    pub requester: Requester,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(entry: EntryRef, requester: Requester) -> Self {
        Self {
            id: NEXT_ITEM_ID.fetch_add(1, Ordering::Relaxed),
            entry,
            requester,
            enqueued_at: Utc::now(),
        }
    }

    pub fn metadata(&self) -> TrackMetadata {
        self.entry.metadata()
    }
}

#[derive(Debug, Default)]
pub struct PlayQueue {
    pending: VecDeque<QueueItem>,
    history: VecDeque<QueueItem>,
    history_limit: Option<usize>,
}

impl PlayQueue {
    /// `history_limit = None` 表示历史不设上限
    pub fn new(history_limit: Option<usize>) -> Self {
        Self {
            pending: VecDeque::new(),
            history: VecDeque::new(),
            history_limit,
        }
    }

    pub fn enqueue_back(&mut self, item: QueueItem) {
        self.pending.push_back(item);
    }

    pub fn enqueue_front(&mut self, item: QueueItem) {
        self.pending.push_front(item);
    }

    /// 队首出队，同时记入历史
    pub fn dequeue_front(&mut self) -> Option<QueueItem> {
        let item = self.pending.pop_front()?;
        self.push_history(item.clone());
        Some(item)
    }

    fn push_history(&mut self, item: QueueItem) {
        self.history.push_front(item);
        if let Some(limit) = self.history_limit {
            self.history.truncate(limit);
        }
    }

    /// 1 起始
    pub fn remove(&mut self, position: usize) -> Result<QueueItem, QueueError> {
        let len = self.pending.len();
        if position == 0 || position > len {
            return Err(QueueError::OutOfRange { position, len });
        }
        self.pending
            .remove(position - 1)
            .ok_or(QueueError::OutOfRange { position, len })
    }

    /// 均匀打乱待播列表，历史不动
    pub fn shuffle(&mut self) {
        let mut rng = rand::thread_rng();
        self.pending.make_contiguous().shuffle(&mut rng);
    }

    pub fn peek_window(&self, n: usize) -> Vec<QueueItem> {
        self.pending.iter().take(n).cloned().collect()
    }

    pub fn history_front(&self) -> Option<&QueueItem> {
        self.history.front()
    }

    pub fn history_front_mut(&mut self) -> Option<&mut QueueItem> {
        self.history.front_mut()
    }

    pub fn pop_history_front(&mut self) -> Option<QueueItem> {
        self.history.pop_front()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn items(&self) -> impl Iterator<Item = &QueueItem> {
        self.pending.iter()
    }

    pub fn history(&self) -> impl Iterator<Item = &QueueItem> {
        self.history.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::link_cache::CacheEntry;

    fn items(n: usize) -> Vec<QueueItem> {
        (0..n)
            .map(|i| {
                let meta = TrackMetadata::new(
                    format!("https://www.youtube.com/watch?v=v{i}"),
                    format!("https://stream.example/v{i}"),
                    format!("track {i}"),
                    "uploader",
                    60,
                );
                QueueItem::new(Arc::new(CacheEntry::new(meta)), Requester::new("u1", "tester"))
            })
            .collect()
    }

    fn ids(q: &PlayQueue) -> Vec<u64> {
        q.items().map(|i| i.id).collect()
    }

    #[test]
    fn enqueue_front_then_dequeue_returns_it() {
        let mut its = items(3);
        let mut q = PlayQueue::new(None);
        let c = its.pop().unwrap();
        let b = its.pop().unwrap();
        let a = its.pop().unwrap();
        q.enqueue_back(a.clone());
        q.enqueue_back(b.clone());
        q.enqueue_front(c.clone());

        let first = q.dequeue_front().unwrap();
        assert_eq!(first.id, c.id);
        assert_eq!(q.history_front().map(|i| i.id), Some(c.id));
        assert_eq!(ids(&q), vec![a.id, b.id]);
    }

    #[test]
    fn remove_is_one_based_and_bounds_checked() {
        let its = items(3);
        let mut q = PlayQueue::new(None);
        for it in &its {
            q.enqueue_back(it.clone());
        }

        assert_eq!(q.remove(2).unwrap().id, its[1].id);
        assert_eq!(q.remove(0).unwrap_err(), QueueError::OutOfRange { position: 0, len: 2 });
        assert_eq!(q.remove(3).unwrap_err(), QueueError::OutOfRange { position: 3, len: 2 });
        assert_eq!(ids(&q), vec![its[0].id, its[2].id]);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let its = items(20);
        let mut q = PlayQueue::new(None);
        for it in &its {
            q.enqueue_back(it.clone());
        }
        q.shuffle();

        let mut after = ids(&q);
        after.sort_unstable();
        let mut before: Vec<u64> = its.iter().map(|i| i.id).collect();
        before.sort_unstable();
        assert_eq!(after, before);
        assert_eq!(q.history_len(), 0);
    }

    #[test]
    fn history_cap_drops_oldest() {
        let its = items(4);
        let mut q = PlayQueue::new(Some(2));
        for it in &its {
            q.enqueue_back(it.clone());
        }
        while q.dequeue_front().is_some() {}

        let hist: Vec<u64> = q.history().map(|i| i.id).collect();
        assert_eq!(hist, vec![its[3].id, its[2].id]);
    }

    #[test]
    fn peek_window_does_not_mutate() {
        let its = items(3);
        let mut q = PlayQueue::new(None);
        for it in &its {
            q.enqueue_back(it.clone());
        }
        let window = q.peek_window(2);
        assert_eq!(window.len(), 2);
        assert!(Arc::ptr_eq(&window[0].entry, &its[0].entry));
        assert_eq!(q.len(), 3);
        assert_eq!(q.peek_window(10).len(), 3);
    }
}
