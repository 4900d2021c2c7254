use tokio::sync::{mpsc, oneshot};

use crate::domain::{Reference, Requester, TrackMetadata};
use crate::error::PlayerError;
use crate::queue::QueueItem;

use super::messages::{CoreMsg, Enqueued, NowPlaying, PlayerCommand, QueueSnapshot, Reply, Toggled};

/// 协调器的可克隆句柄；所有操作都排进同一个收件箱
#[derive(Clone)]
pub struct PlayerHandle {
    tx: mpsc::Sender<CoreMsg>,
}

impl PlayerHandle {
    pub(super) fn new(tx: mpsc::Sender<CoreMsg>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> PlayerCommand,
    ) -> Result<T, PlayerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CoreMsg::Command(build(reply)))
            .await
            .map_err(|_| PlayerError::Closed)?;
        rx.await.map_err(|_| PlayerError::Closed)?
    }

    async fn notify(&self, cmd: PlayerCommand) -> Result<(), PlayerError> {
        self.tx
            .send(CoreMsg::Command(cmd))
            .await
            .map_err(|_| PlayerError::Closed)
    }

    /// 链接或搜索词入队；`front` 为 true 时插到队首
    pub async fn enqueue(
        &self,
        input: &str,
        requester: Requester,
        front: bool,
    ) -> Result<Enqueued, PlayerError> {
        let reference = Reference::parse(input).ok_or(PlayerError::EmptyReference)?;
        self.request(|reply| PlayerCommand::Enqueue {
            reference,
            requester,
            front,
            reply,
        })
        .await
    }

    pub async fn skip(&self) -> Result<TrackMetadata, PlayerError> {
        self.request(|reply| PlayerCommand::Skip { reply }).await
    }

    pub async fn pause(&self) -> Result<(), PlayerError> {
        self.request(|reply| PlayerCommand::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<(), PlayerError> {
        self.request(|reply| PlayerCommand::Resume { reply }).await
    }

    pub async fn toggle_pause(&self) -> Result<Toggled, PlayerError> {
        self.request(|reply| PlayerCommand::TogglePause { reply })
            .await
    }

    /// `clear_all` 为 true 时清空队列和历史并断开输出
    pub async fn stop(&self, clear_all: bool) -> Result<(), PlayerError> {
        self.request(|reply| PlayerCommand::Stop { clear_all, reply })
            .await
    }

    pub async fn previous(&self) -> Result<TrackMetadata, PlayerError> {
        self.request(|reply| PlayerCommand::Previous { reply })
            .await
    }

    /// 按 1 起始的位置移除待播项
    pub async fn remove(&self, position: usize) -> Result<QueueItem, PlayerError> {
        self.request(|reply| PlayerCommand::Remove { position, reply })
            .await
    }

    pub async fn shuffle(&self) -> Result<usize, PlayerError> {
        self.request(|reply| PlayerCommand::Shuffle { reply })
            .await
    }

    pub async fn queue_state(&self) -> Result<QueueSnapshot, PlayerError> {
        self.request(|reply| PlayerCommand::QueueState { reply })
            .await
    }

    pub async fn now_playing(&self) -> Result<Option<NowPlaying>, PlayerError> {
        self.request(|reply| PlayerCommand::NowPlaying { reply })
            .await
    }

    pub async fn listeners_changed(&self, count: usize) -> Result<(), PlayerError> {
        self.notify(PlayerCommand::ListenersChanged { count }).await
    }

    pub async fn shutdown(&self) -> Result<(), PlayerError> {
        self.notify(PlayerCommand::Shutdown).await
    }
}
