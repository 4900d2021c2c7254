//! 应用通用错误

use super::{CacheError, PlayerError, ResolveError};

/// 应用通用错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error("JSON 序列化失败: {0}")]
    Serde(#[from] serde_json::Error),

    /// 缓存错误
    #[error("缓存错误: {0}")]
    Cache(#[from] CacheError),

    /// 解析错误
    #[error("解析错误: {0}")]
    Resolve(#[from] ResolveError),

    /// 播放错误
    #[error("播放错误: {0}")]
    Player(#[from] PlayerError),

    /// 设置文件错误
    #[error("设置错误: {0}")]
    Settings(String),

    /// 其他错误
    #[error("{0}")]
    Other(String),
}
