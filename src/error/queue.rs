//! 播放队列相关错误

/// 队列位置错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// 1 起始的位置越界
    #[error("位置越界: {position}（队列长度 {len}）")]
    OutOfRange { position: usize, len: usize },

    /// 历史中没有可恢复的上一首
    #[error("没有上一首")]
    NoPrevious,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_display() {
        let err = QueueError::OutOfRange { position: 7, len: 3 };
        assert_eq!(err.to_string(), "位置越界: 7（队列长度 3）");
    }
}
