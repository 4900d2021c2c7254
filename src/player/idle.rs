use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::messages::CoreMsg;

struct Armed {
    generation: u64,
    deadline: Instant,
    task: JoinHandle<()>,
}

/// 空闲倒计时；同一时刻最多一个
pub(super) struct IdleTimer {
    timeout: Duration,
    armed: Option<Armed>,
}

impl IdleTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            armed: None,
        }
    }

    /// 重新开始倒计时，旧的直接作废
    pub fn arm(&mut self, generation: u64, tx: mpsc::Sender<CoreMsg>) {
        self.cancel();
        let deadline = Instant::now() + self.timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(CoreMsg::IdleExpired { generation }).await;
        });
        tracing::debug!(generation, timeout_secs = self.timeout.as_secs(), "空闲计时开始");
        self.armed = Some(Armed {
            generation,
            deadline,
            task,
        });
    }

    pub fn cancel(&mut self) {
        if let Some(armed) = self.armed.take() {
            armed.task.abort();
            tracing::debug!(generation = armed.generation, "空闲计时取消");
        }
    }

    /// 到期消息是否来自当前这次倒计时；是则清掉
    pub fn accept(&mut self, generation: u64) -> bool {
        if self.armed.as_ref().is_some_and(|a| a.generation == generation) {
            self.armed = None;
            true
        } else {
            false
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.armed.as_ref().map(|a| a.deadline)
    }
}

impl Drop for IdleTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_timeout() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = IdleTimer::new(Duration::from_secs(300));
        timer.arm(5, tx);
        assert!(timer.deadline().is_some());

        let start = Instant::now();
        match rx.recv().await {
            Some(CoreMsg::IdleExpired { generation }) => assert_eq!(generation, 5),
            other => panic!("unexpected {other:?}"),
        }
        assert!(start.elapsed() >= Duration::from_secs(300));
        assert!(timer.accept(5));
        assert!(timer.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_previous_countdown() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = IdleTimer::new(Duration::from_secs(10));
        timer.arm(1, tx.clone());
        tokio::time::sleep(Duration::from_secs(5)).await;
        timer.arm(2, tx);

        match rx.recv().await {
            Some(CoreMsg::IdleExpired { generation }) => assert_eq!(generation, 2),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!timer.accept(1));
        assert!(timer.accept(2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_expiry() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut timer = IdleTimer::new(Duration::from_secs(10));
        timer.arm(1, tx);
        timer.cancel();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(rx.try_recv().is_err());
    }
}
