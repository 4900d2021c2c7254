//! 统一错误处理模块
//!
//! 每个关注点一个结构化错误类型，由 thiserror 派生 Display 与 Error。

mod app;
mod cache;
mod player;
mod queue;
mod resolve;

pub use app::AppError;
pub use cache::CacheError;
pub use player::{PlayerError, PrepareError};
pub use queue::QueueError;
pub use resolve::ResolveError;
