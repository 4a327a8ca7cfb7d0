//! The per-credential quota cache.
//!
//! [`QuotaCache::get_quotas`] serves a snapshot younger than [`CACHE_TTL`]
//! directly. Anything older is revalidated (refreshing the access token
//! first when needed); if revalidation fails the previous snapshot is served
//! regardless of age, and only a credential with no snapshot at all yields
//! an error.
//!
//! Every mutation of the in-memory [`Store`] is followed by a synchronous
//! write of the whole document while the store lock is still held, so the
//! file always reflects the latest mutation order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::OwnedMutexGuard;

use crate::core::credential_hash::fingerprint;
use crate::core::credentials::{CredentialRefresher, needs_refresh};
use crate::core::metrics::{CacheMetrics, MetricsSnapshot};
use crate::core::models::{
    CLEANUP_TTL, Credential, ModelQuota, QuotaResponse, QuotaSnapshot, Store, UpstreamQuotas,
    duration_ms,
};
use crate::error::{QuotaCacheError, Result};
use crate::storage::{Config, store};
use crate::util::time::{localize, now_ms};

/// Default deadline for one quota fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Where fresh quota data comes from.
///
/// Implementations are opaque to the cache: any error is treated as an
/// upstream failure and is a stale-fallback candidate.
pub trait QuotaSource: Send + Sync {
    fn fetch_quotas<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> BoxFuture<'a, anyhow::Result<UpstreamQuotas>>;
}

/// Project a cached snapshot into the caller-facing shape.
#[must_use]
pub fn format_snapshot(snapshot: &QuotaSnapshot) -> QuotaResponse {
    QuotaResponse {
        last_updated: snapshot.last_updated,
        models: snapshot
            .models
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    ModelQuota {
                        remaining: entry.r.unwrap_or(0),
                        reset_time: localize(entry.t.as_deref()),
                        reset_time_raw: entry.t.clone(),
                    },
                )
            })
            .collect(),
    }
}

/// Per-key revalidation state.
///
/// `state` is held for the whole of a revalidation and records the failure of
/// the last completed attempt, if it failed. `completed` counts attempts.
#[derive(Default)]
struct KeySlot {
    completed: AtomicU64,
    state: Arc<tokio::sync::Mutex<Option<QuotaCacheError>>>,
}

type KeyLocks = Mutex<HashMap<String, Arc<KeySlot>>>;

/// Copy of a revalidation failure handed to callers that queued behind it.
fn replay_failure(err: &QuotaCacheError) -> QuotaCacheError {
    match err {
        QuotaCacheError::Refresh(message) => QuotaCacheError::Refresh(message.clone()),
        QuotaCacheError::Upstream(message) => QuotaCacheError::Upstream(message.clone()),
        other => QuotaCacheError::Upstream(other.to_string()),
    }
}

/// Durable quota cache shared by request handlers and the eviction task.
pub struct QuotaCache {
    path: PathBuf,
    store: Mutex<Store>,
    key_locks: KeyLocks,
    source: Arc<dyn QuotaSource>,
    refresher: CredentialRefresher,
    fetch_timeout: Duration,
    metrics: CacheMetrics,
}

impl std::fmt::Debug for QuotaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaCache")
            .field("path", &self.path)
            .field("entries", &self.len())
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}

impl QuotaCache {
    /// Load the store at `path` (or start empty) and build a cache over it.
    pub fn new(
        path: impl Into<PathBuf>,
        source: Arc<dyn QuotaSource>,
        refresher: CredentialRefresher,
    ) -> Self {
        let path = path.into();
        let metrics = CacheMetrics::new();
        let (store, load_failed) = store::load(&path);
        if load_failed {
            metrics.record_load_failure();
        }
        tracing::info!(?path, entries = store.quotas.len(), "Quota cache opened");

        Self {
            path,
            store: Mutex::new(store),
            key_locks: Mutex::new(HashMap::new()),
            source,
            refresher,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            metrics,
        }
    }

    /// Build a cache from configuration: store location and fetch deadline.
    pub fn open(
        config: &Config,
        source: Arc<dyn QuotaSource>,
        refresher: CredentialRefresher,
    ) -> Self {
        Self::new(config.cache.store_path(), source, refresher)
            .with_fetch_timeout(config.cache.fetch_timeout())
    }

    #[must_use]
    pub const fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    #[must_use]
    pub fn store_path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Return quotas for `credential_id`, revalidating when the cached
    /// snapshot is missing or older than the freshness window.
    ///
    /// `credential` may be updated in place by a token refresh; callers
    /// should persist it if they own its storage.
    ///
    /// # Errors
    ///
    /// Returns [`QuotaCacheError::Fetch`] only when revalidation failed and
    /// nothing was cached for this credential.
    pub async fn get_quotas(
        &self,
        credential_id: &str,
        credential: &mut Credential,
    ) -> Result<QuotaResponse> {
        if let Some(response) = self.fresh_response(credential_id) {
            return Ok(response);
        }

        // One revalidation per key at a time. A caller that queued behind an
        // attempt takes that attempt's outcome instead of starting another.
        let mut lease = self.lease(credential_id);
        let seen = lease.completed();
        lease.acquire().await;
        if let Some(response) = self.fresh_response(credential_id) {
            return Ok(response);
        }

        let existing = self.lock_store().quotas.get(credential_id).cloned();
        if lease.completed() > seen {
            if let Some(failure) = lease.last_failure() {
                tracing::debug!(
                    credential = %fingerprint(credential_id),
                    "Reusing failed revalidation from a concurrent caller"
                );
                return self.fall_back(credential_id, existing, failure);
            }
        }

        self.metrics.record_revalidation();
        let outcome = self.revalidate(credential_id, credential).await;
        lease.record(outcome.as_ref().err());

        match outcome {
            Ok(snapshot) => Ok(format_snapshot(&snapshot)),
            Err(err) => {
                self.metrics.record_fetch_failure();
                self.fall_back(credential_id, existing, err)
            }
        }
    }

    /// Cached quotas without revalidation, whatever their age.
    #[must_use]
    pub fn peek(&self, credential_id: &str) -> Option<QuotaResponse> {
        self.lock_store()
            .quotas
            .get(credential_id)
            .map(format_snapshot)
    }

    /// Drop one credential's snapshot. Returns whether anything was removed.
    pub fn invalidate(&self, credential_id: &str) -> bool {
        let mut store = self.lock_store();
        let removed = store.quotas.remove(credential_id).is_some();
        if removed {
            tracing::debug!(credential = %fingerprint(credential_id), "Invalidated cached quotas");
            self.persist(&store);
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_store().quotas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the current store to disk.
    ///
    /// # Errors
    ///
    /// Returns [`QuotaCacheError::Save`] if the write failed.
    pub fn flush(&self) -> Result<()> {
        let store = self.lock_store();
        store::try_save(&self.path, &store).inspect_err(|_| self.metrics.record_save_failure())
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Evict snapshots past the retention window, as of now.
    pub fn sweep(&self) -> usize {
        self.sweep_at(now_ms())
    }

    /// Remove every snapshot last updated more than [`CLEANUP_TTL`] before
    /// `now_ms`. The store is only written when something was removed.
    pub fn sweep_at(&self, now_ms: i64) -> usize {
        let cutoff = now_ms.saturating_sub(duration_ms(CLEANUP_TTL));
        let mut store = self.lock_store();
        let removed = store.remove_older_than(cutoff);
        if removed == 0 {
            tracing::trace!("Eviction sweep found nothing to remove");
            return 0;
        }

        store.meta.last_cleanup = now_ms;
        self.persist(&store);
        self.metrics.record_evicted(removed);
        tracing::info!(removed, remaining = store.quotas.len(), "Evicted stale quota snapshots");
        removed
    }

    /// Serve `existing` after a failed revalidation, or surface the failure.
    fn fall_back(
        &self,
        credential_id: &str,
        existing: Option<QuotaSnapshot>,
        err: QuotaCacheError,
    ) -> Result<QuotaResponse> {
        let credential = fingerprint(credential_id);
        if let Some(existing) = existing {
            tracing::warn!(
                %credential,
                error = %err,
                age_ms = existing.age_ms(now_ms()),
                "Quota revalidation failed, serving cached snapshot"
            );
            self.metrics.record_stale_served();
            Ok(format_snapshot(&existing))
        } else {
            tracing::warn!(%credential, error = %err, "Quota revalidation failed with nothing cached");
            Err(QuotaCacheError::Fetch {
                credential,
                source: Box::new(err),
            })
        }
    }

    fn fresh_response(&self, credential_id: &str) -> Option<QuotaResponse> {
        let now = now_ms();
        let response = self
            .lock_store()
            .quotas
            .get(credential_id)
            .filter(|snapshot| snapshot.is_fresh_at(now))
            .map(format_snapshot)?;
        self.metrics.record_fresh_hit();
        tracing::trace!(credential = %fingerprint(credential_id), "Serving fresh cached quotas");
        Some(response)
    }

    async fn revalidate(
        &self,
        credential_id: &str,
        credential: &mut Credential,
    ) -> Result<QuotaSnapshot> {
        if needs_refresh(credential) {
            tracing::debug!(credential = %fingerprint(credential_id), "Refreshing access token");
            self.refresher.refresh(credential).await?;
            self.metrics.record_token_refresh();
        }

        let quotas = tokio::time::timeout(self.fetch_timeout, self.source.fetch_quotas(credential))
            .await
            .map_err(|_| {
                QuotaCacheError::Upstream(format!(
                    "quota fetch timed out after {}s",
                    self.fetch_timeout.as_secs()
                ))
            })?
            .map_err(|e| QuotaCacheError::Upstream(format!("{e:#}")))?;

        if quotas.is_empty() {
            return Err(QuotaCacheError::Upstream(
                "quota source returned no models".to_string(),
            ));
        }

        let snapshot = QuotaSnapshot::from_upstream(quotas, now_ms());
        {
            let mut store = self.lock_store();
            store
                .quotas
                .insert(credential_id.to_string(), snapshot.clone());
            self.persist(&store);
        }
        tracing::debug!(
            credential = %fingerprint(credential_id),
            models = snapshot.models.len(),
            "Cached fresh quotas"
        );
        Ok(snapshot)
    }

    fn persist(&self, store: &Store) {
        if !store::save(&self.path, store) {
            self.metrics.record_save_failure();
        }
    }

    fn lock_store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register interest in `credential_id`'s slot without waiting for it.
    fn lease(&self, credential_id: &str) -> KeyLease<'_> {
        let slot = Arc::clone(
            self.key_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(credential_id.to_string())
                .or_default(),
        );
        KeyLease {
            locks: &self.key_locks,
            key: credential_id.to_string(),
            slot,
            guard: None,
        }
    }
}

/// A caller's handle on one key slot.
///
/// Dropping it, acquired or not, removes the map entry once no other lease
/// refers to the slot.
struct KeyLease<'a> {
    locks: &'a KeyLocks,
    key: String,
    slot: Arc<KeySlot>,
    guard: Option<OwnedMutexGuard<Option<QuotaCacheError>>>,
}

impl KeyLease<'_> {
    fn completed(&self) -> u64 {
        self.slot.completed.load(Ordering::Acquire)
    }

    async fn acquire(&mut self) {
        if self.guard.is_none() {
            self.guard = Some(Arc::clone(&self.slot.state).lock_owned().await);
        }
    }

    fn last_failure(&self) -> Option<QuotaCacheError> {
        self.guard
            .as_ref()
            .and_then(|state| state.as_ref().map(replay_failure))
    }

    /// Record the outcome of this caller's attempt. Requires the guard.
    fn record(&mut self, failure: Option<&QuotaCacheError>) {
        if let Some(state) = self.guard.as_mut() {
            **state = failure.map(replay_failure);
            self.slot.completed.fetch_add(1, Ordering::Release);
        }
    }
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this lease are the only remaining references
        if locks.get(&self.key).is_some_and(|slot| {
            Arc::ptr_eq(slot, &self.slot) && Arc::strong_count(slot) == 2
        }) {
            locks.remove(&self.key);
        }
    }
}
