//! 播放协调器
//!
//! 单个 tokio 任务独占队列和播放会话。解析、探测、准备都在外部任务里跑，
//! 完成后把结果作为消息投回收件箱，所以状态只在这里被修改。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::mpsc;

use crate::domain::{PlaybackState, Reference, Requester, TrackMetadata};
use crate::error::{PlayerError, PrepareError, QueueError, ResolveError};
use crate::link_cache::{EntryRef, LinkCache};
use crate::queue::{PlayQueue, QueueItem};
use crate::transport::{ReconnectPolicy, TransportCommand, TransportEvent};

use super::handle::PlayerHandle;
use super::idle::IdleTimer;
use super::messages::{
    CoreMsg, Enqueued, NowPlaying, PlayerCommand, PlayerEvent, QueueSnapshot, Reply, Toggled,
};
use super::prefetch::Prefetcher;
use super::prepare::{Prepared, prepare_entry};
use super::session::PlaybackSession;

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub prefetch_window: usize,
    pub idle_timeout: Duration,
    /// None 表示历史不设上限
    pub history_limit: Option<usize>,
    pub reconnect: ReconnectPolicy,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            prefetch_window: 2,
            idle_timeout: Duration::from_secs(300),
            history_limit: None,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// 已解析、等待按到达顺序入队的请求
struct HeldEnqueue {
    result: Result<EntryRef, ResolveError>,
    requester: Requester,
    front: bool,
    reply: Reply<Enqueued>,
}

/// 正在准备的一次切歌
struct PendingAdvance {
    ticket: u64,
    /// 本轮还能再尝试几首
    budget: usize,
}

struct Coordinator {
    cache: LinkCache,
    cfg: PlayerConfig,
    queue: PlayQueue,
    session: PlaybackSession,
    pending: Option<PendingAdvance>,
    next_ticket: u64,
    /// 入队按收到命令的顺序编号，`held` 里的结果按编号依次落位
    next_seq: u64,
    next_to_place: u64,
    held: BTreeMap<u64, HeldEnqueue>,
    idle: IdleTimer,
    prefetcher: Prefetcher,
    tx_self: mpsc::WeakSender<CoreMsg>,
    tx_transport: mpsc::Sender<TransportCommand>,
    tx_evt: mpsc::Sender<PlayerEvent>,
}

pub fn spawn_player(
    cache: LinkCache,
    tx_transport: mpsc::Sender<TransportCommand>,
    mut rx_transport: mpsc::Receiver<TransportEvent>,
    cfg: PlayerConfig,
) -> (PlayerHandle, mpsc::Receiver<PlayerEvent>) {
    let (tx, mut rx) = mpsc::channel::<CoreMsg>(64);
    let (tx_evt, rx_evt) = mpsc::channel::<PlayerEvent>(64);

    let mut core = Coordinator {
        prefetcher: Prefetcher::new(cache.clone(), cfg.prefetch_window),
        queue: PlayQueue::new(cfg.history_limit),
        idle: IdleTimer::new(cfg.idle_timeout),
        cache,
        cfg,
        session: PlaybackSession::default(),
        pending: None,
        next_ticket: 1,
        next_seq: 0,
        next_to_place: 0,
        held: BTreeMap::new(),
        tx_self: tx.downgrade(),
        tx_transport,
        tx_evt,
    };

    tokio::spawn(async move {
        tracing::info!(
            prefetch_window = core.cfg.prefetch_window,
            idle_timeout_secs = core.cfg.idle_timeout.as_secs(),
            "播放协调器已启动"
        );
        loop {
            let msg = select! {
                maybe = rx.recv() => match maybe {
                    Some(msg) => msg,
                    None => break,
                },
                Some(evt) = rx_transport.recv() => CoreMsg::Transport(evt),
            };
            if core.reduce(msg).await {
                break;
            }
        }
        core.shutdown().await;
        tracing::info!("播放协调器已退出");
    });

    (PlayerHandle::new(tx), rx_evt)
}

impl Coordinator {
    async fn reduce(&mut self, msg: CoreMsg) -> bool {
        match msg {
            CoreMsg::Command(cmd) => return self.handle_command(cmd).await,
            CoreMsg::Transport(evt) => self.handle_transport(evt).await,
            CoreMsg::Resolved {
                seq,
                result,
                requester,
                front,
                reply,
            } => self.hold(
                seq,
                HeldEnqueue {
                    result,
                    requester,
                    front,
                    reply,
                },
            ),
            CoreMsg::Prepared { ticket, result } => self.on_prepared(ticket, result).await,
            CoreMsg::IdleExpired { generation } => self.on_idle_expired(generation).await,
        }
        false
    }

    async fn handle_command(&mut self, cmd: PlayerCommand) -> bool {
        match cmd {
            PlayerCommand::Enqueue {
                reference,
                requester,
                front,
                reply,
            } => self.enqueue(reference, requester, front, reply),
            PlayerCommand::Skip { reply } => {
                let _ = reply.send(self.skip().await);
            }
            PlayerCommand::Pause { reply } => {
                let _ = reply.send(self.pause().await);
            }
            PlayerCommand::Resume { reply } => {
                let _ = reply.send(self.resume().await);
            }
            PlayerCommand::TogglePause { reply } => {
                let _ = reply.send(self.toggle_pause().await);
            }
            PlayerCommand::Stop { clear_all, reply } => {
                self.stop(clear_all).await;
                let _ = reply.send(Ok(()));
            }
            PlayerCommand::Previous { reply } => {
                let _ = reply.send(self.previous().await);
            }
            PlayerCommand::Remove { position, reply } => {
                let result = self.queue.remove(position).map_err(PlayerError::from);
                if result.is_ok() && position <= self.prefetcher.window() {
                    self.kick_prefetch();
                }
                let _ = reply.send(result);
            }
            PlayerCommand::Shuffle { reply } => {
                self.queue.shuffle();
                self.kick_prefetch();
                let _ = reply.send(Ok(self.queue.len()));
            }
            PlayerCommand::QueueState { reply } => {
                let _ = reply.send(Ok(self.snapshot()));
            }
            PlayerCommand::NowPlaying { reply } => {
                let _ = reply.send(Ok(self.now_playing()));
            }
            PlayerCommand::ListenersChanged { count } => self.listeners_changed(count),
            PlayerCommand::Shutdown => return true,
        }
        false
    }

    fn enqueue(
        &mut self,
        reference: Reference,
        requester: Requester,
        front: bool,
        reply: Reply<Enqueued>,
    ) {
        if let Some(hit) = self.cache.lookup(&reference.alias_key()) {
            tracing::debug!(canonical_id = hit.canonical_id(), "入队命中缓存");
            let seq = self.take_seq();
            self.hold(
                seq,
                HeldEnqueue {
                    result: Ok(hit),
                    requester,
                    front,
                    reply,
                },
            );
            return;
        }
        let Some(tx) = self.tx_self.upgrade() else {
            let _ = reply.send(Err(PlayerError::Closed));
            return;
        };
        let seq = self.take_seq();
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let result = cache.resolve_or_fetch(&reference).await;
            let _ = tx
                .send(CoreMsg::Resolved {
                    seq,
                    result,
                    requester,
                    front,
                    reply,
                })
                .await;
        });
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// 先到的请求还在解析时，后到的结果在这里等着
    fn hold(&mut self, seq: u64, held: HeldEnqueue) {
        self.held.insert(seq, held);
        if seq != self.next_to_place {
            tracing::debug!(seq, waiting_for = self.next_to_place, "入队结果等待前序请求");
        }
        while let Some(ready) = self.held.remove(&self.next_to_place) {
            self.next_to_place += 1;
            self.insert_resolved(ready.result, ready.requester, ready.front, ready.reply);
        }
    }

    fn insert_resolved(
        &mut self,
        result: Result<EntryRef, ResolveError>,
        requester: Requester,
        front: bool,
        reply: Reply<Enqueued>,
    ) {
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(err = %e, "入队解析失败");
                let _ = reply.send(Err(PlayerError::Resolution(e)));
                return;
            }
        };

        let was_empty = self.queue.is_empty();
        let item = QueueItem::new(Arc::clone(&entry), requester);
        let position = if front {
            self.queue.enqueue_front(item);
            1
        } else {
            self.queue.enqueue_back(item);
            self.queue.len()
        };

        // 正在切歌时新来的曲目也要有机会被尝试
        if let Some(pending) = self.pending.as_mut() {
            pending.budget += 1;
        }

        let idle = self.session.state == PlaybackState::Idle && self.pending.is_none();
        if idle {
            self.idle.cancel();
        }
        let started = idle && was_empty;
        tracing::info!(
            canonical_id = entry.canonical_id(),
            position,
            front,
            started,
            "已入队"
        );
        let _ = reply.send(Ok(Enqueued {
            position,
            entry,
            started,
        }));

        if started {
            self.start_advance();
        } else {
            self.kick_prefetch();
        }
    }

    fn start_advance(&mut self) {
        let budget = self.queue.len();
        self.advance(budget);
    }

    /// 取队首开始准备；失败的曲目在 `on_prepared` 里继续往后试，总次数受 budget 限制
    fn advance(&mut self, budget: usize) {
        self.session.clear_track();
        self.pending = None;
        if budget == 0 {
            self.finish_queue();
            return;
        }
        let Some(item) = self.queue.dequeue_front() else {
            self.finish_queue();
            return;
        };
        let Some(tx) = self.tx_self.upgrade() else {
            return;
        };

        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.session.current = Some(item.clone());
        self.pending = Some(PendingAdvance {
            ticket,
            budget: budget - 1,
        });
        self.idle.cancel();

        tracing::debug!(ticket, canonical_id = item.entry.canonical_id(), "准备下一首");
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let result = prepare_entry(&cache, item.entry).await;
            let _ = tx.send(CoreMsg::Prepared { ticket, result }).await;
        });
    }

    fn finish_queue(&mut self) {
        self.session.clear_track();
        self.pending = None;
        tracing::info!("队列已播完");
        self.emit(PlayerEvent::QueueEnded);
        self.arm_idle();
    }

    async fn on_prepared(&mut self, ticket: u64, result: Result<Prepared, PrepareError>) {
        let budget = match self.pending.take() {
            Some(p) if p.ticket == ticket => p.budget,
            other => {
                self.pending = other;
                tracing::debug!(ticket, "丢弃过期的准备结果");
                return;
            }
        };

        match result {
            Ok(Prepared { entry, metadata }) => {
                if let Some(cur) = self.session.current.as_mut()
                    && !Arc::ptr_eq(&cur.entry, &entry)
                {
                    cur.entry = Arc::clone(&entry);
                    if let Some(hist) = self.queue.history_front_mut()
                        && hist.id == cur.id
                    {
                        hist.entry = Arc::clone(&entry);
                    }
                }

                let generation = self.session.bump();
                self.session.track_generation = Some(generation);
                self.session.state = PlaybackState::Playing;
                self.idle.cancel();

                let duration_hint = (metadata.duration_secs > 0)
                    .then(|| Duration::from_secs(metadata.duration_secs));
                let _ = self
                    .tx_transport
                    .send(TransportCommand::Play {
                        url: metadata.stream_url.clone(),
                        title: metadata.title.clone(),
                        duration_hint,
                        reconnect: self.cfg.reconnect,
                        generation,
                    })
                    .await;
                tracing::info!(generation, title = %metadata.title, "开始播放");

                if let Some(item) = self.session.current.clone() {
                    self.emit(PlayerEvent::NowPlaying(NowPlaying {
                        item,
                        metadata,
                        state: PlaybackState::Playing,
                        generation,
                    }));
                }
                self.kick_prefetch();
            }
            Err(e) => {
                if let Some(item) = self.session.current.take() {
                    // 没播出来的曲目不记历史
                    if self.queue.history_front().is_some_and(|h| h.id == item.id) {
                        self.queue.pop_history_front();
                    }
                    let meta = item.metadata();
                    tracing::warn!(canonical_id = %meta.canonical_id, title = %meta.title, err = %e, "曲目无法播放，已跳过");
                    self.emit(PlayerEvent::TrackDropped {
                        title: meta.title,
                        canonical_id: meta.canonical_id,
                        reason: e.to_string(),
                    });
                }
                self.advance(budget);
            }
        }
    }

    async fn handle_transport(&mut self, evt: TransportEvent) {
        match evt {
            TransportEvent::Finished { generation } => {
                if self.session.track_generation != Some(generation) {
                    tracing::debug!(
                        generation,
                        current = ?self.session.track_generation,
                        "丢弃过期的播放结束通知"
                    );
                    return;
                }
                tracing::info!(generation, "曲目播放结束");
                self.session.track_generation = None;
                self.start_advance();
            }
            TransportEvent::Error {
                generation,
                message,
            } => {
                if self.session.track_generation != Some(generation) {
                    tracing::debug!(generation, err = %message, "丢弃过期的输出错误");
                    return;
                }
                tracing::warn!(generation, err = %message, "输出端播放失败");
                self.emit(PlayerEvent::TransportError { message });
                self.session.track_generation = None;
                self.start_advance();
            }
        }
    }

    async fn skip(&mut self) -> Result<TrackMetadata, PlayerError> {
        if !self.session.is_active() {
            return Err(PlayerError::NothingPlaying);
        }
        let skipped = self
            .session
            .current
            .as_ref()
            .map(QueueItem::metadata)
            .ok_or(PlayerError::NothingPlaying)?;
        self.session.bump();
        self.session.track_generation = None;
        let _ = self.tx_transport.send(TransportCommand::Stop).await;
        self.idle.cancel();
        tracing::info!(title = %skipped.title, "跳过当前曲目");
        self.start_advance();
        Ok(skipped)
    }

    async fn pause(&mut self) -> Result<(), PlayerError> {
        if self.session.state != PlaybackState::Playing {
            return Err(PlayerError::InvalidState {
                op: "pause",
                state: self.session.state,
            });
        }
        let _ = self.tx_transport.send(TransportCommand::Pause).await;
        self.session.state = PlaybackState::Paused;
        let generation = self.session.bump();
        tracing::info!(generation, "已暂停");
        self.arm_idle();
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), PlayerError> {
        if self.session.state != PlaybackState::Paused {
            return Err(PlayerError::InvalidState {
                op: "resume",
                state: self.session.state,
            });
        }
        let _ = self.tx_transport.send(TransportCommand::Resume).await;
        self.session.state = PlaybackState::Playing;
        let generation = self.session.bump();
        tracing::info!(generation, "已恢复播放");
        self.idle.cancel();
        Ok(())
    }

    async fn toggle_pause(&mut self) -> Result<Toggled, PlayerError> {
        match self.session.state {
            PlaybackState::Playing => self.pause().await.map(|()| Toggled::Paused),
            PlaybackState::Paused => self.resume().await.map(|()| Toggled::Resumed),
            PlaybackState::Idle => {
                if self.pending.is_some() || self.queue.is_empty() {
                    return Err(PlayerError::NothingPlaying);
                }
                self.idle.cancel();
                self.start_advance();
                Ok(Toggled::Started)
            }
        }
    }

    async fn stop(&mut self, clear_all: bool) {
        self.session.bump();
        let preparing = self.pending.take().is_some();
        let _ = self.tx_transport.send(TransportCommand::Stop).await;
        if clear_all {
            self.teardown().await;
        } else {
            // 还没播出来的曲目放回队首
            if preparing && let Some(item) = self.session.current.take() {
                if self.queue.history_front().is_some_and(|h| h.id == item.id) {
                    self.queue.pop_history_front();
                }
                self.queue.enqueue_front(item);
            }
            self.session.clear_track();
            tracing::info!(queued = self.queue.len(), "已停止，保留队列");
            self.arm_idle();
        }
    }

    /// 历史队首就是当前曲目时，把它排回上一首之后
    async fn previous(&mut self) -> Result<TrackMetadata, PlayerError> {
        let current_id = self.session.current.as_ref().map(|c| c.id);
        let current_in_history =
            current_id.is_some() && self.queue.history_front().map(|h| h.id) == current_id;
        let needed = if current_in_history { 2 } else { 1 };
        if self.queue.history_len() < needed {
            return Err(QueueError::NoPrevious.into());
        }

        let current = if current_in_history {
            self.queue.pop_history_front()
        } else {
            None
        };
        let Some(prior) = self.queue.pop_history_front() else {
            return Err(QueueError::NoPrevious.into());
        };

        let was_active = self.session.is_active();
        self.session.bump();
        self.session.track_generation = None;
        self.pending = None;
        if was_active {
            let _ = self.tx_transport.send(TransportCommand::Stop).await;
        }

        if let Some(cur) = current {
            self.queue.enqueue_front(cur);
        }
        let meta = prior.metadata();
        self.queue.enqueue_front(prior);
        self.idle.cancel();
        tracing::info!(title = %meta.title, "回到上一首");
        self.start_advance();
        Ok(meta)
    }

    fn listeners_changed(&mut self, count: usize) {
        let before = self.session.listeners;
        self.session.listeners = count;
        tracing::debug!(before, count, "听众数变化");
        if count == 0 && self.session.state == PlaybackState::Paused {
            self.arm_idle();
        }
    }

    async fn on_idle_expired(&mut self, generation: u64) {
        if !self.idle.accept(generation) {
            tracing::debug!(generation, "丢弃已取消的空闲到期");
            return;
        }
        if generation != self.session.generation {
            tracing::debug!(
                generation,
                current = self.session.generation,
                "丢弃过期的空闲到期"
            );
            return;
        }

        let paused_alone =
            self.session.state == PlaybackState::Paused && self.session.listeners == 0;
        let idle_empty = self.session.state == PlaybackState::Idle
            && self.pending.is_none()
            && self.queue.is_empty();
        if paused_alone || idle_empty {
            tracing::info!(paused_alone, idle_empty, "空闲超时，断开连接");
            self.teardown().await;
        } else {
            tracing::debug!(
                state = %self.session.state,
                listeners = self.session.listeners,
                queued = self.queue.len(),
                "空闲到期但不满足断开条件"
            );
        }
    }

    async fn teardown(&mut self) {
        self.session.bump();
        self.queue.clear();
        self.queue.clear_history();
        self.session.clear_track();
        self.pending = None;
        self.idle.cancel();
        let _ = self.tx_transport.send(TransportCommand::Disconnect).await;
        tracing::info!("已清空队列并断开输出");
        self.emit(PlayerEvent::TornDown);
    }

    async fn shutdown(&mut self) {
        self.idle.cancel();
        let _ = self.tx_transport.send(TransportCommand::Disconnect).await;
    }

    fn arm_idle(&mut self) {
        if let Some(tx) = self.tx_self.upgrade() {
            self.idle.arm(self.session.generation, tx);
        }
    }

    fn kick_prefetch(&self) {
        let entries: Vec<EntryRef> = self
            .queue
            .peek_window(self.prefetcher.window())
            .into_iter()
            .map(|item| item.entry)
            .collect();
        if !entries.is_empty() {
            drop(self.prefetcher.spawn_warm(entries));
        }
    }

    fn emit(&self, evt: PlayerEvent) {
        if let Err(e) = self.tx_evt.try_send(evt) {
            tracing::debug!(err = %e, "通知通道不可用，丢弃事件");
        }
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            state: self.session.state,
            advancing: self.pending.is_some(),
            current: self.session.current.as_ref().map(QueueItem::metadata),
            upcoming: self.queue.items().map(QueueItem::metadata).collect(),
            history: self.queue.history().map(QueueItem::metadata).collect(),
            generation: self.session.generation,
            idle_remaining: self
                .idle
                .deadline()
                .map(|d| d.saturating_duration_since(tokio::time::Instant::now())),
            listeners: self.session.listeners,
        }
    }

    fn now_playing(&self) -> Option<NowPlaying> {
        if !self.session.is_active() {
            return None;
        }
        let item = self.session.current.clone()?;
        Some(NowPlaying {
            metadata: item.metadata(),
            item,
            state: self.session.state,
            generation: self.session.track_generation.unwrap_or(self.session.generation),
        })
    }
}
