//! 曲目解析：引用 -> 元数据
//!
//! 缓存和协调器只依赖 [`Resolver`] trait，yt-dlp 实现可以在测试里替换掉。

mod ytdlp;

use async_trait::async_trait;

use crate::domain::{Reference, TrackMetadata};
use crate::error::ResolveError;

pub use ytdlp::{YtDlpConfig, YtDlpResolver};

#[async_trait]
pub trait Resolver: Send + Sync {
    /// 链接直接解析；搜索词只取最佳的一个结果
    async fn resolve(&self, reference: &Reference) -> Result<TrackMetadata, ResolveError>;
}
