#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use tracklink::domain::{Reference, TrackMetadata};
use tracklink::error::ResolveError;
use tracklink::link_cache::{LinkCache, LinkProbe};
use tracklink::player::{PlayerConfig, PlayerEvent, PlayerHandle, spawn_player};
use tracklink::resolver::Resolver;
use tracklink::transport::{TransportCommand, TransportEvent};

pub fn watch_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={id}")
}

pub fn stream_url(id: &str, rev: u32) -> String {
    format!("https://stream.test/{id}/{rev}")
}

pub fn track(id: &str, title: &str, rev: u32) -> TrackMetadata {
    TrackMetadata::new(watch_url(id), stream_url(id, rev), title, "uploader", 180)
}

/// 按脚本应答的解析器
///
/// 键：链接原样；搜索词为 `search:` 加小写查询。
#[derive(Default)]
pub struct FakeResolver {
    scripted: Mutex<HashMap<String, Result<TrackMetadata, ResolveError>>>,
    per_key: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn key(reference: &Reference) -> String {
        match reference {
            Reference::Url(u) => u.clone(),
            Reference::Search(q) => format!("search:{}", q.to_lowercase()),
        }
    }

    pub fn set(&self, key: impl Into<String>, meta: TrackMetadata) {
        self.scripted.lock().insert(key.into(), Ok(meta));
    }

    pub fn fail(&self, key: impl Into<String>, err: ResolveError) {
        self.scripted.lock().insert(key.into(), Err(err));
    }

    /// 同一视频：页面链接和标题搜索都返回它
    pub fn add_track(&self, meta: &TrackMetadata) {
        self.set(meta.canonical_id.clone(), meta.clone());
        self.set(format!("search:{}", meta.title.to_lowercase()), meta.clone());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, key: &str) -> usize {
        self.per_key.lock().get(key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn resolve(&self, reference: &Reference) -> Result<TrackMetadata, ResolveError> {
        let key = Self::key(reference);
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.per_key.lock().entry(key.clone()).or_default() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.scripted.lock().get(&key).cloned();
        match scripted {
            Some(Ok(mut meta)) => {
                meta.resolved_at = chrono::Utc::now();
                Ok(meta)
            }
            Some(Err(e)) => Err(e),
            None => Err(ResolveError::NotFound(key)),
        }
    }
}

/// 默认所有链接有效，`mark_stale` 之后探测失败
#[derive(Default)]
pub struct FakeProbe {
    stale: Mutex<HashSet<String>>,
    probes: AtomicUsize,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_stale(&self, url: impl Into<String>) {
        self.stale.lock().insert(url.into());
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkProbe for FakeProbe {
    async fn is_valid(&self, url: &str) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        !self.stale.lock().contains(url)
    }
}

pub fn memory_cache(resolver: &Arc<FakeResolver>, probe: &Arc<FakeProbe>) -> LinkCache {
    LinkCache::in_memory(resolver.clone(), probe.clone())
}

/// 协调器 + 假输出端；测试直接读命令、注入事件
pub struct Harness {
    pub resolver: Arc<FakeResolver>,
    pub probe: Arc<FakeProbe>,
    pub cache: LinkCache,
    pub player: PlayerHandle,
    pub events: mpsc::Receiver<PlayerEvent>,
    pub commands: mpsc::Receiver<TransportCommand>,
    pub transport: mpsc::Sender<TransportEvent>,
}

pub fn test_config() -> PlayerConfig {
    PlayerConfig {
        // 关掉预取，解析器调用次数才确定
        prefetch_window: 0,
        ..PlayerConfig::default()
    }
}

impl Harness {
    pub fn new(resolver: FakeResolver, cfg: PlayerConfig) -> Self {
        let resolver = Arc::new(resolver);
        let probe = Arc::new(FakeProbe::new());
        let cache = memory_cache(&resolver, &probe);
        let (tx_cmd, commands) = mpsc::channel(64);
        let (transport, rx_evt) = mpsc::channel(64);
        let (player, events) = spawn_player(cache.clone(), tx_cmd, rx_evt, cfg);
        Self {
            resolver,
            probe,
            cache,
            player,
            events,
            commands,
            transport,
        }
    }

    /// 等到下一条 Play，返回 (url, generation)；中间的其它命令丢掉
    pub async fn next_play(&mut self) -> (String, u64) {
        loop {
            let cmd = tokio::time::timeout(Duration::from_secs(5), self.commands.recv())
                .await
                .expect("等待 Play 超时")
                .expect("命令通道已关闭");
            if let TransportCommand::Play {
                url, generation, ..
            } = cmd
            {
                return (url, generation);
            }
        }
    }

    /// 取出当前已发出的全部命令
    pub fn drain_commands(&mut self) -> Vec<TransportCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.commands.try_recv() {
            out.push(cmd);
        }
        out
    }

    pub fn drain_events(&mut self) -> Vec<PlayerEvent> {
        let mut out = Vec::new();
        while let Ok(evt) = self.events.try_recv() {
            out.push(evt);
        }
        out
    }

    pub async fn next_event(&mut self) -> PlayerEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("等待事件超时")
            .expect("事件通道已关闭")
    }

    pub async fn finish(&self, generation: u64) {
        self.transport
            .send(TransportEvent::Finished { generation })
            .await
            .expect("send Finished");
    }
}

/// 让已就绪的任务都跑完
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
