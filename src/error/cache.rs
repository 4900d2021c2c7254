//! 链接缓存相关错误

use super::ResolveError;

/// 缓存操作错误类型
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// 文件操作失败
    #[error("文件操作失败: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化失败
    #[error("序列化失败: {0}")]
    Serde(#[from] serde_json::Error),

    /// 缓存文件顶层结构不被支持
    #[error("缓存文件格式不支持: {0}")]
    Format(String),

    /// 不是可识别的视频链接
    #[error("无效的视频链接: {0}")]
    InvalidUrl(String),

    /// 按 canonical id 找不到条目
    #[error("缓存条目不存在: {0}")]
    UnknownEntry(String),

    /// 解析器失败
    #[error("解析失败: {0}")]
    Resolve(#[from] ResolveError),

    /// 后台写盘任务失败
    #[error("后台任务失败: {0}")]
    Task(String),
}
