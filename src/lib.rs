//! 按链接或搜索词排队播放在线音频
//!
//! - `link_cache`：别名到流地址的缓存，带单飞刷新和落盘
//! - `player`：播放协调器（actor），负责队列推进和空闲断开
//! - `transport`：音频输出端协议与实现

pub mod domain;
pub mod error;
pub mod link_cache;
pub mod logging;
pub mod player;
pub mod queue;
pub mod resolver;
pub mod settings;
pub mod transport;
