use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Start/stop plumbing shared by the detector engines. Each engine owns one
/// runner; `start` spawns a ticking task and `stop` cancels it. Both are
/// idempotent so the management API can call them freely.
pub struct EngineRunner {
    name: &'static str,
    shutdown: Mutex<Option<CancellationToken>>,
}

impl EngineRunner {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            shutdown: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.lock().expect("runner lock poisoned").is_some()
    }

    /// Spawn the tick loop. A second call while running is a no-op.
    pub fn start<F, Fut>(&self, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut guard = self.shutdown.lock().expect("runner lock poisoned");
        if guard.is_some() {
            tracing::warn!(engine = self.name, "already running, ignoring start");
            return;
        }

        let token = CancellationToken::new();
        *guard = Some(token.clone());
        let name = self.name;

        tokio::spawn(async move {
            tracing::info!(engine = name, period_secs = period.as_secs(), "engine started");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!(engine = name, "engine stopped");
                        break;
                    }
                    _ = interval.tick() => tick().await,
                }
            }
        });
    }

    /// Cancel the tick loop. Safe to call when not running.
    pub fn stop(&self) {
        let token = self.shutdown.lock().expect("runner lock poisoned").take();
        match token {
            Some(token) => token.cancel(),
            None => tracing::debug!(engine = self.name, "stop called while not running"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let runner = EngineRunner::new("test");
        let ticks = Arc::new(AtomicUsize::new(0));

        let t1 = ticks.clone();
        runner.start(Duration::from_millis(10), move || {
            let t = t1.clone();
            async move {
                t.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert!(runner.is_running());

        // Second start must not spawn a second loop.
        let t2 = ticks.clone();
        runner.start(Duration::from_millis(1), move || {
            let t = t2.clone();
            async move {
                t.fetch_add(1000, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(35)).await;
        runner.stop();
        assert!(!runner.is_running());
        assert!(ticks.load(Ordering::SeqCst) < 1000);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let runner = EngineRunner::new("test");
        runner.stop();
        assert!(!runner.is_running());
    }

    #[tokio::test]
    async fn test_stop_halts_ticking() {
        let runner = EngineRunner::new("test");
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = ticks.clone();
        runner.start(Duration::from_millis(5), move || {
            let t = t.clone();
            async move {
                t.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        runner.stop();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let after_stop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        // At most one in-flight tick after cancellation.
        assert!(ticks.load(Ordering::SeqCst) <= after_stop + 1);
    }
}
