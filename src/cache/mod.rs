//! Sliding-expiration cache
//!
//! Holds resources keyed by `K`. Every successful lookup pushes the entry's
//! expiry forward; an entry is eligible for disposal only when it has not been
//! touched for the configured expiration AND the disposal policy agrees.
//!
//! Sweeps run either on the caller's own operations (at most once per cleanup
//! interval) or on a background task started with
//! [`SlidingExpirationCache::start_cleanup_task`]. A value handed out just
//! before it is swept may already be disposed; callers re-validate what they
//! get back.

mod cleanup;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::SwitchyardResult;

use self::cleanup::CleanupTask;

/// Decides whether and how cached values are released
#[async_trait]
pub trait DisposalPolicy<V>: Send + Sync {
    /// Whether an expired value may be disposed now
    fn should_dispose(&self, _value: &V) -> bool {
        true
    }

    /// Release the value. Called at most once per removed entry.
    async fn dispose(&self, value: V) -> SwitchyardResult<()>;
}

/// Policy for values that need no cleanup
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDisposal;

#[async_trait]
impl<V: Send + 'static> DisposalPolicy<V> for NoDisposal {
    async fn dispose(&self, _value: V) -> SwitchyardResult<()> {
        Ok(())
    }
}

struct CacheEntry<V> {
    value: V,
    last_access_nanos: AtomicU64,
}

impl<V> CacheEntry<V> {
    fn new(value: V, now: u64) -> Self {
        Self {
            value,
            last_access_nanos: AtomicU64::new(now),
        }
    }

    fn touch(&self, now: u64) {
        self.last_access_nanos.fetch_max(now, Ordering::AcqRel);
    }

    fn is_expired(&self, now: u64, expiration_nanos: u64) -> bool {
        now.saturating_sub(self.last_access_nanos.load(Ordering::Acquire)) > expiration_nanos
    }
}

/// Concurrent map whose entries expire after a period without access
pub struct SlidingExpirationCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    policy: Arc<dyn DisposalPolicy<V>>,
    expiration: Duration,
    cleanup_interval: Duration,
    epoch: Instant,
    next_cleanup_nanos: AtomicU64,
    cleanup_task: Mutex<Option<CleanupTask>>,
}

impl<K, V> SlidingExpirationCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        expiration: Duration,
        cleanup_interval: Duration,
        policy: Arc<dyn DisposalPolicy<V>>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            policy,
            expiration,
            cleanup_interval,
            epoch: Instant::now(),
            next_cleanup_nanos: AtomicU64::new(duration_nanos(cleanup_interval)),
            cleanup_task: Mutex::new(None),
        }
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    fn now_nanos(&self) -> u64 {
        duration_nanos(self.epoch.elapsed())
    }

    /// Return the cached value for `key`, building it with `factory` when absent.
    ///
    /// Concurrent calls for the same key run the factory at most once; a
    /// factory error leaves the key unmapped.
    pub async fn compute_if_absent<F>(&self, key: K, factory: F) -> SwitchyardResult<V>
    where
        F: FnOnce(&K) -> SwitchyardResult<V> + Send,
    {
        self.cleanup_if_due().await;
        self.compute_now(key, factory)
    }

    fn compute_now<F>(&self, key: K, factory: F) -> SwitchyardResult<V>
    where
        F: FnOnce(&K) -> SwitchyardResult<V>,
    {
        let now = self.now_nanos();
        match self.entries.entry(key) {
            Entry::Occupied(occupied) => {
                let entry = occupied.get();
                entry.touch(now);
                Ok(entry.value.clone())
            }
            Entry::Vacant(vacant) => {
                let value = factory(vacant.key())?;
                vacant.insert(CacheEntry::new(value.clone(), now));
                Ok(value)
            }
        }
    }

    /// Look up `key`, refreshing its expiry on a hit
    pub async fn get(&self, key: &K) -> Option<V> {
        self.cleanup_if_due().await;
        self.get_now(key)
    }

    fn get_now(&self, key: &K) -> Option<V> {
        let now = self.now_nanos();
        self.entries.get(key).map(|entry| {
            entry.touch(now);
            entry.value.clone()
        })
    }

    /// Insert or replace a value, returning the previous one undisposed
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let now = self.now_nanos();
        self.entries
            .insert(key, CacheEntry::new(value, now))
            .map(|previous| previous.value)
    }

    /// Remove `key` and dispose its value.
    ///
    /// Unless `force` is set the entry stays cached when the policy refuses
    /// disposal. Returns whether the entry was removed.
    pub async fn remove(&self, key: &K, force: bool) -> bool {
        let policy = Arc::clone(&self.policy);
        let removed = self
            .entries
            .remove_if(key, |_, entry| force || policy.should_dispose(&entry.value));

        match removed {
            Some((key, entry)) => {
                self.dispose_value(&key, entry.value).await;
                true
            }
            None => false,
        }
    }

    /// Dispose every entry that is both stale and allowed to go.
    ///
    /// A failing disposal is logged and the sweep continues. Returns the number
    /// of entries removed.
    pub async fn sweep(&self) -> usize {
        let started = self.now_nanos();
        self.schedule_next_cleanup(started);

        let expiration = duration_nanos(self.expiration);
        let candidates: Vec<K> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(started, expiration))
            .map(|entry| entry.key().clone())
            .collect();

        let mut disposed = 0;
        for key in candidates {
            // Re-checked under the shard lock so a concurrent lookup wins
            let now = self.now_nanos();
            let policy = Arc::clone(&self.policy);
            let removed = self.entries.remove_if(&key, |_, entry| {
                entry.is_expired(now, expiration) && policy.should_dispose(&entry.value)
            });

            if let Some((key, entry)) = removed {
                self.dispose_value(&key, entry.value).await;
                disposed += 1;
            }
        }

        if disposed > 0 {
            tracing::debug!("Cache sweep disposed {} expired entries", disposed);
        }
        disposed
    }

    /// Remove and dispose every entry regardless of age or policy
    pub async fn clear(&self) {
        let keys: Vec<K> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            if let Some((key, entry)) = self.entries.remove(&key) {
                self.dispose_value(&key, entry.value).await;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of cached values without touching their expiry
    pub fn values(&self) -> Vec<V> {
        self.entries
            .iter()
            .map(|entry| entry.value().value.clone())
            .collect()
    }

    fn schedule_next_cleanup(&self, now: u64) {
        self.next_cleanup_nanos.store(
            now.saturating_add(duration_nanos(self.cleanup_interval)),
            Ordering::Release,
        );
    }

    /// Caller-driven sweep; skipped while the background task owns cleanup
    async fn cleanup_if_due(&self) {
        if self.is_cleanup_task_running() {
            return;
        }

        let now = self.now_nanos();
        let due = self.next_cleanup_nanos.load(Ordering::Acquire);
        if now < due {
            return;
        }

        // Only the caller that moves the deadline sweeps
        let next = now.saturating_add(duration_nanos(self.cleanup_interval));
        if self
            .next_cleanup_nanos
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.sweep().await;
        }
    }

    async fn dispose_value(&self, key: &K, value: V) {
        match AssertUnwindSafe(self.policy.dispose(value))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => tracing::debug!("Disposed cache entry {:?}", key),
            Ok(Err(e)) => tracing::warn!("Failed to dispose cache entry {:?}: {}", key, e),
            Err(_) => tracing::warn!("Disposal of cache entry {:?} panicked", key),
        }
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
