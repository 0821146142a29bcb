use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::HeartbeatConfig;

/// 心跳的数据来源
///
/// 只读取共享状态，不修改缓冲区与当前阶段。
#[async_trait]
pub trait HeartbeatSource: Send + Sync {
    /// 距离最近一次内容驱动的进度推送
    fn since_last_emit(&self) -> Duration;

    async fn beat(&self, elapsed: Duration);
}

/// 心跳任务的作用域守卫
///
/// `stop` 取消并等待任务结束；直接 drop 时取消并 abort，
/// 因此任何退出路径都不会留下游离的心跳任务。
pub struct HeartbeatGuard {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HeartbeatGuard {
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map(JoinHandle::is_finished).unwrap_or(true)
    }
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// 启动心跳监督任务
///
/// `parent` 取消时心跳随之结束。前 `min_elapsed` 内不发送；
/// 最近一个间隔内已有内容推送时跳过本次心跳。
pub fn spawn_heartbeat(
    config: &HeartbeatConfig,
    parent: &CancellationToken,
    source: Arc<dyn HeartbeatSource>,
) -> HeartbeatGuard {
    let token = parent.child_token();
    let interval = config.interval();
    let min_elapsed = config.min_elapsed();
    let task_token = token.clone();

    let handle = tokio::spawn(async move {
        let started = Instant::now();
        let mut ticker = interval_at(started + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = task_token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let elapsed = started.elapsed();
            if elapsed < min_elapsed {
                continue;
            }
            if source.since_last_emit() < interval {
                debug!("heartbeat skipped, content emitted recently");
                continue;
            }

            tokio::select! {
                _ = task_token.cancelled() => break,
                _ = source.beat(elapsed) => {}
            }
        }
    });

    HeartbeatGuard {
        token,
        handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        beats: AtomicUsize,
        last_emit: Mutex<std::time::Instant>,
    }

    #[async_trait]
    impl HeartbeatSource for Counter {
        fn since_last_emit(&self) -> Duration {
            self.last_emit.lock().elapsed()
        }

        async fn beat(&self, _elapsed: Duration) {
            self.beats.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counter() -> Arc<Counter> {
        Arc::new(Counter {
            beats: AtomicUsize::new(0),
            last_emit: Mutex::new(std::time::Instant::now() - Duration::from_secs(60)),
        })
    }

    fn fast_config(min_elapsed_ms: u64) -> HeartbeatConfig {
        HeartbeatConfig {
            interval_ms: 20,
            min_elapsed_ms,
        }
    }

    #[tokio::test]
    async fn test_heartbeat_fires_and_stops() {
        let source = counter();
        let parent = CancellationToken::new();
        let guard = spawn_heartbeat(&fast_config(0), &parent, source.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;
        guard.stop().await;
        let beats = source.beats.load(Ordering::SeqCst);
        assert!(beats >= 2, "expected heartbeats, got {beats}");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(source.beats.load(Ordering::SeqCst), beats);
    }

    #[tokio::test]
    async fn test_heartbeat_suppressed_before_min_elapsed() {
        let source = counter();
        let parent = CancellationToken::new();
        let guard = spawn_heartbeat(&fast_config(10_000), &parent, source.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(guard);
        assert_eq!(source.beats.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_parent_cancellation_ends_heartbeat() {
        let source = counter();
        let parent = CancellationToken::new();
        let guard = spawn_heartbeat(&fast_config(0), &parent, source.clone());
        parent.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(guard.is_finished());
    }

    #[tokio::test]
    async fn test_recent_content_skips_heartbeat() {
        let source = counter();
        let parent = CancellationToken::new();
        let config = HeartbeatConfig {
            interval_ms: 200,
            min_elapsed_ms: 0,
        };
        let guard = spawn_heartbeat(&config, &parent, source.clone());
        for _ in 0..25 {
            *source.last_emit.lock() = std::time::Instant::now();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        guard.stop().await;
        assert_eq!(source.beats.load(Ordering::SeqCst), 0);
    }
}
