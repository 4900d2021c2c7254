use crate::domain::PlaybackState;
use crate::queue::QueueItem;

/// 协调器独占的播放会话
#[derive(Debug, Default)]
pub(super) struct PlaybackSession {
    pub current: Option<QueueItem>,
    pub state: PlaybackState,
    /// 每次状态迁移递增
    pub generation: u64,
    /// 当前曲目交给输出端时的 generation；只有它对应的 Finished 才算数
    pub track_generation: Option<u64>,
    pub listeners: usize,
}

impl PlaybackSession {
    pub fn bump(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, PlaybackState::Playing | PlaybackState::Paused)
    }

    /// 回到 Idle，不动 generation
    pub fn clear_track(&mut self) {
        self.current = None;
        self.track_generation = None;
        self.state = PlaybackState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_is_monotonic() {
        let mut s = PlaybackSession::default();
        let a = s.bump();
        let b = s.bump();
        assert!(b > a);
        assert_eq!(s.generation, b);
    }

    #[test]
    fn clear_track_keeps_generation() {
        let mut s = PlaybackSession {
            state: PlaybackState::Playing,
            track_generation: Some(3),
            generation: 3,
            ..PlaybackSession::default()
        };
        s.clear_track();
        assert_eq!(s.state, PlaybackState::Idle);
        assert_eq!(s.track_generation, None);
        assert_eq!(s.generation, 3);
        assert!(!s.is_active());
    }
}
