//! 音频输出协议
//!
//! 协调器只通过命令/事件通道和输出端交互。每次 `Play` 带一个 generation，
//! 自然播完时原样带回 `Finished`，协调器据此丢弃过期通知。

mod download;
mod null_engine;
mod rodio_engine;

use std::time::Duration;

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// 流式响应中途断开也重连
    pub streamed: bool,
    pub max_delay_secs: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            streamed: true,
            max_delay_secs: 5,
        }
    }
}

impl ReconnectPolicy {
    /// 不重连时只尝试一次
    pub fn retries(&self) -> u32 {
        if self.enabled { 3 } else { 0 }
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    Play {
        url: String,
        title: String,
        /// 已知时长；模拟输出端用来决定何时“播完”
        duration_hint: Option<Duration>,
        reconnect: ReconnectPolicy,
        generation: u64,
    },
    Pause,
    Resume,
    Stop,
    /// 停止并释放输出设备
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// 只在自然播完时发送
    Finished { generation: u64 },
    Error { generation: u64, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportBackend {
    /// 真实播放：下载后用 rodio 解码输出
    Rodio,
    /// 不出声，按时长模拟播放
    Null,
}

pub fn spawn_transport(
    backend: TransportBackend,
) -> (mpsc::Sender<TransportCommand>, mpsc::Receiver<TransportEvent>) {
    let (tx_cmd, rx_cmd) = mpsc::channel::<TransportCommand>(64);
    let (tx_evt, rx_evt) = mpsc::channel::<TransportEvent>(64);

    match backend {
        TransportBackend::Rodio => rodio_engine::spawn(rx_cmd, tx_evt),
        TransportBackend::Null => null_engine::spawn(rx_cmd, tx_evt),
    }

    (tx_cmd, rx_evt)
}
