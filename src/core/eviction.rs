//! Background eviction of expired quota snapshots.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::core::engine::QuotaCache;
use crate::core::models::CLEANUP_TTL;

/// Handle to the periodic sweep loop.
///
/// Dropping the handle aborts the loop; [`EvictionTask::shutdown`] stops it
/// gracefully and waits for it to finish.
#[derive(Debug)]
pub struct EvictionTask {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl EvictionTask {
    /// Sweep every [`CLEANUP_TTL`].
    #[must_use]
    pub fn spawn(cache: Arc<QuotaCache>) -> Self {
        Self::spawn_with_period(cache, CLEANUP_TTL)
    }

    /// Sweep every `period`. The first sweep runs one period after spawning.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn_with_period(cache: Arc<QuotaCache>, period: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::debug!(period_secs = period.as_secs(), "Eviction task started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep();
                        tracing::trace!(removed, "Eviction tick");
                    }
                }
            }

            tracing::debug!("Eviction task stopped");
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Eviction task ended abnormally");
            }
        }
    }
}

impl Drop for EvictionTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::credentials::CredentialRefresher;
    use crate::core::models::{Store, duration_ms};
    use crate::storage::store;
    use crate::test_utils::{ScriptedQuotaSource, ScriptedTokenExchange, make_test_snapshot};
    use crate::util::time::now_ms;
    use tempfile::TempDir;

    fn cache_over(dir: &TempDir, seeded: &Store) -> Arc<QuotaCache> {
        let path = dir.path().join("quotas.json");
        store::try_save(&path, seeded).unwrap();
        Arc::new(QuotaCache::new(
            path,
            Arc::new(ScriptedQuotaSource::new()),
            CredentialRefresher::new(Arc::new(ScriptedTokenExchange::failing("unused"))),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_on_each_period() {
        let dir = TempDir::new().unwrap();
        let mut seeded = Store::empty(now_ms());
        let expired = now_ms() - duration_ms(CLEANUP_TTL) - 1_000;
        seeded.quotas.insert(
            "old".to_string(),
            make_test_snapshot(expired, &[("m", Some(1), None)]),
        );
        let cache = cache_over(&dir, &seeded);

        let task = EvictionTask::spawn_with_period(Arc::clone(&cache), Duration::from_secs(60));

        // Nothing happens before the first period elapses
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(cache.len(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(cache.is_empty());
        assert_eq!(cache.metrics().evicted, 1);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_loop() {
        let dir = TempDir::new().unwrap();
        let cache = cache_over(&dir, &Store::empty(now_ms()));
        let task = EvictionTask::spawn_with_period(Arc::clone(&cache), Duration::from_secs(1));

        task.shutdown().await;

        // Only the test holds the cache once the task has exited
        assert_eq!(Arc::strong_count(&cache), 1);
    }
}
