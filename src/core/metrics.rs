//! Counters for cache behaviour.
//!
//! Swallowed failures (store load/save) are otherwise only visible in logs,
//! so every branch that absorbs one also bumps a counter here.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters shared by one cache instance.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    fresh_hits: AtomicU64,
    revalidations: AtomicU64,
    stale_served: AtomicU64,
    fetch_failures: AtomicU64,
    token_refreshes: AtomicU64,
    evicted: AtomicU64,
    load_failures: AtomicU64,
    save_failures: AtomicU64,
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Served from cache without revalidating.
    pub fresh_hits: u64,
    /// Revalidation attempts (one per upstream round trip).
    pub revalidations: u64,
    /// Revalidation failed and an older snapshot was served.
    pub stale_served: u64,
    /// Revalidation failed with nothing to fall back on.
    pub fetch_failures: u64,
    /// Successful token exchanges.
    pub token_refreshes: u64,
    /// Snapshots removed by eviction sweeps.
    pub evicted: u64,
    pub load_failures: u64,
    pub save_failures: u64,
}

impl CacheMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fresh_hits: AtomicU64::new(0),
            revalidations: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            token_refreshes: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            save_failures: AtomicU64::new(0),
        }
    }

    pub fn record_fresh_hit(&self) {
        self.fresh_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_revalidation(&self) {
        self.revalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_served(&self) {
        self.stale_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_token_refresh(&self) {
        self.token_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, count: usize) {
        self.evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_save_failure(&self) {
        self.save_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fresh_hits: self.fresh_hits.load(Ordering::Relaxed),
            revalidations: self.revalidations.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            token_refreshes: self.token_refreshes.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
        }
    }
}
