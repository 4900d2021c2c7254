use std::time::Duration;

use tokio::sync::oneshot;

use crate::domain::{PlaybackState, Reference, Requester, TrackMetadata};
use crate::error::{PlayerError, PrepareError, ResolveError};
use crate::link_cache::EntryRef;
use crate::queue::QueueItem;
use crate::transport::TransportEvent;

use super::prepare::Prepared;

pub type Reply<T> = oneshot::Sender<Result<T, PlayerError>>;

#[derive(Debug)]
pub enum PlayerCommand {
    Enqueue {
        reference: Reference,
        requester: Requester,
        front: bool,
        reply: Reply<Enqueued>,
    },
    Skip {
        reply: Reply<TrackMetadata>,
    },
    Pause {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    TogglePause {
        reply: Reply<Toggled>,
    },
    Stop {
        clear_all: bool,
        reply: Reply<()>,
    },
    Previous {
        reply: Reply<TrackMetadata>,
    },
    Remove {
        position: usize,
        reply: Reply<QueueItem>,
    },
    Shuffle {
        reply: Reply<usize>,
    },
    QueueState {
        reply: Reply<QueueSnapshot>,
    },
    NowPlaying {
        reply: Reply<Option<NowPlaying>>,
    },
    ListenersChanged {
        count: usize,
    },
    Shutdown,
}

/// 协调器收件箱
#[derive(Debug)]
pub(super) enum CoreMsg {
    Command(PlayerCommand),
    Transport(TransportEvent),
    Resolved {
        seq: u64,
        result: Result<EntryRef, ResolveError>,
        requester: Requester,
        front: bool,
        reply: Reply<Enqueued>,
    },
    Prepared {
        ticket: u64,
        result: Result<Prepared, PrepareError>,
    },
    IdleExpired {
        generation: u64,
    },
}

#[derive(Debug, Clone)]
pub struct Enqueued {
    /// 1 起始的队列位置
    pub position: usize,
    pub entry: EntryRef,
    /// 这次入队是否直接触发了播放
    pub started: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggled {
    Paused,
    Resumed,
    Started,
}

#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub item: QueueItem,
    pub metadata: TrackMetadata,
    pub state: PlaybackState,
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub state: PlaybackState,
    pub advancing: bool,
    pub current: Option<TrackMetadata>,
    pub upcoming: Vec<TrackMetadata>,
    pub history: Vec<TrackMetadata>,
    pub generation: u64,
    /// 空闲倒计时剩余时间
    pub idle_remaining: Option<Duration>,
    pub listeners: usize,
}

/// 给前端的通知
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    NowPlaying(NowPlaying),
    TrackDropped {
        title: String,
        canonical_id: String,
        reason: String,
    },
    QueueEnded,
    TornDown,
    TransportError {
        message: String,
    },
}
