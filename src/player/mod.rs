//! 播放协调：队列推进、链接准备、暂停/空闲断开

mod coordinator;
mod handle;
mod idle;
mod messages;
mod prefetch;
mod prepare;
mod session;

pub use coordinator::{PlayerConfig, spawn_player};
pub use handle::PlayerHandle;
pub use messages::{
    Enqueued, NowPlaying, PlayerCommand, PlayerEvent, QueueSnapshot, Reply, Toggled,
};
pub use prefetch::{PrefetchReport, Prefetcher};
