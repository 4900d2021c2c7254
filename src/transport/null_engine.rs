use std::time::Duration;

use tokio::select;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{TransportCommand, TransportEvent};

struct Simulated {
    generation: u64,
    title: String,
    /// None 表示时长未知，永远不会自然结束
    remaining: Option<Duration>,
    /// 暂停时为 None
    resumed_at: Option<Instant>,
}

impl Simulated {
    fn deadline(&self) -> Option<Instant> {
        Some(self.resumed_at? + self.remaining?)
    }
}

/// 不出声的输出端：按时长计时，到点发送 Finished
struct NullEngine {
    rx_cmd: mpsc::Receiver<TransportCommand>,
    tx_evt: mpsc::Sender<TransportEvent>,
    current: Option<Simulated>,
}

impl NullEngine {
    fn new(rx_cmd: mpsc::Receiver<TransportCommand>, tx_evt: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            rx_cmd,
            tx_evt,
            current: None,
        }
    }

    async fn run(mut self) {
        loop {
            let deadline = self.current.as_ref().and_then(Simulated::deadline);
            select! {
                maybe_cmd = self.rx_cmd.recv() => {
                    let Some(cmd) = maybe_cmd else {
                        break;
                    };
                    self.handle_command(cmd);
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(done) = self.current.take() {
                        tracing::debug!(generation = done.generation, title = %done.title, "模拟播放结束");
                        let _ = self
                            .tx_evt
                            .send(TransportEvent::Finished { generation: done.generation })
                            .await;
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: TransportCommand) {
        match cmd {
            TransportCommand::Play {
                title,
                duration_hint,
                generation,
                ..
            } => {
                tracing::info!(generation, title = %title, "模拟播放开始");
                self.current = Some(Simulated {
                    generation,
                    title,
                    remaining: duration_hint,
                    resumed_at: Some(Instant::now()),
                });
            }
            TransportCommand::Pause => {
                if let Some(cur) = self.current.as_mut()
                    && let Some(started) = cur.resumed_at.take()
                {
                    cur.remaining = cur.remaining.map(|r| r.saturating_sub(started.elapsed()));
                }
            }
            TransportCommand::Resume => {
                if let Some(cur) = self.current.as_mut()
                    && cur.resumed_at.is_none()
                {
                    cur.resumed_at = Some(Instant::now());
                }
            }
            TransportCommand::Stop | TransportCommand::Disconnect => {
                self.current = None;
            }
        }
    }
}

pub(super) fn spawn(rx_cmd: mpsc::Receiver<TransportCommand>, tx_evt: mpsc::Sender<TransportEvent>) {
    tokio::spawn(NullEngine::new(rx_cmd, tx_evt).run());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ReconnectPolicy;

    fn play(generation: u64, secs: u64) -> TransportCommand {
        TransportCommand::Play {
            url: "https://stream.example/a".to_owned(),
            title: "a".to_owned(),
            duration_hint: Some(Duration::from_secs(secs)),
            reconnect: ReconnectPolicy::default(),
            generation,
        }
    }

    fn start() -> (mpsc::Sender<TransportCommand>, mpsc::Receiver<TransportEvent>) {
        let (tx_cmd, rx_cmd) = mpsc::channel(8);
        let (tx_evt, rx_evt) = mpsc::channel(8);
        spawn(rx_cmd, tx_evt);
        (tx_cmd, rx_evt)
    }

    #[tokio::test(start_paused = true)]
    async fn finishes_after_duration_with_same_generation() {
        let (tx, mut rx) = start();
        tx.send(play(7, 30)).await.unwrap();

        let started = Instant::now();
        let evt = rx.recv().await.unwrap();
        assert_eq!(evt, TransportEvent::Finished { generation: 7 });
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_extends_playback() {
        let (tx, mut rx) = start();
        tx.send(play(1, 10)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        tx.send(TransportCommand::Pause).await.unwrap();
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(rx.try_recv().is_err());

        tx.send(TransportCommand::Resume).await.unwrap();
        let resumed = Instant::now();
        assert_eq!(rx.recv().await.unwrap(), TransportEvent::Finished { generation: 1 });
        assert!(resumed.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_suppresses_finished() {
        let (tx, mut rx) = start();
        tx.send(play(1, 5)).await.unwrap();
        tx.send(TransportCommand::Stop).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }
}
