//! Background sweep task for [`SlidingExpirationCache`]

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::SlidingExpirationCache;

pub(super) struct CleanupTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl CleanupTask {
    fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }
}

impl<K, V> SlidingExpirationCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Start sweeping every cleanup interval on a background task.
    ///
    /// Returns false when a task is already running for this cache or no
    /// tokio runtime is available. The task holds only a weak reference and
    /// ends once the cache is dropped.
    pub fn start_cleanup_task(self: &Arc<Self>) -> bool {
        let mut slot = self.cleanup_task.lock();
        if slot.as_ref().map(CleanupTask::is_active).unwrap_or(false) {
            return false;
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!("No tokio runtime available, cache cleanup stays caller-driven");
                return false;
            }
        };

        let token = CancellationToken::new();
        let handle = runtime.spawn(run_cleanup(
            Arc::downgrade(self),
            self.cleanup_interval,
            token.clone(),
        ));

        tracing::debug!(
            "Started cache cleanup task with interval {:?}",
            self.cleanup_interval
        );
        *slot = Some(CleanupTask { token, handle });
        true
    }

    /// Cancel the background task and wait for an in-progress sweep to end
    pub async fn stop_cleanup_task(&self) {
        let task = self.cleanup_task.lock().take();
        if let Some(task) = task {
            task.token.cancel();
            if let Err(e) = task.handle.await {
                tracing::warn!("Cache cleanup task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_cleanup_task_running(&self) -> bool {
        self.cleanup_task
            .lock()
            .as_ref()
            .map(CleanupTask::is_active)
            .unwrap_or(false)
    }
}

async fn run_cleanup<K, V>(
    cache: Weak<SlidingExpirationCache<K, V>>,
    period: Duration,
    token: CancellationToken,
) where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.sweep().await;
            }
        }
    }

    tracing::debug!("Cache cleanup task stopped");
}
