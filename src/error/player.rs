//! 播放协调器相关错误

use crate::domain::PlaybackState;

use super::{QueueError, ResolveError};

/// 播放命令错误类型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlayerError {
    /// 输入为空
    #[error("输入为空")]
    EmptyReference,

    /// 引用无法解析成曲目
    #[error("解析失败: {0}")]
    Resolution(#[from] ResolveError),

    /// 队列位置无效
    #[error("无效位置: {0}")]
    InvalidPosition(#[from] QueueError),

    /// 当前没有正在播放或暂停的曲目
    #[error("当前没有播放中的曲目")]
    NothingPlaying,

    /// 当前状态下不允许该操作
    #[error("状态 {state} 下不能执行 {op}")]
    InvalidState {
        op: &'static str,
        state: PlaybackState,
    },

    /// 协调器已退出
    #[error("播放协调器已关闭")]
    Closed,
}

/// 播放前准备失败（链接失效、刷新与回退搜索都失败）
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PrepareError {
    #[error("链接失效且无法恢复（刷新: {refresh}；回退搜索: {fallback}）")]
    Unplayable {
        refresh: ResolveError,
        fallback: ResolveError,
    },
}
