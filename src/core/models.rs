//! Core data models.
//!
//! The persisted document (`Store`) keeps the short field names the on-disk
//! format has always used (`r`, `t`), while the caller-facing
//! `QuotaResponse` spells them out.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A snapshot younger than this is served without revalidation.
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Snapshots older than this are evicted; also the sweep period.
pub const CLEANUP_TTL: Duration = Duration::from_secs(60 * 60);

/// Access tokens are refreshed this long before they actually expire.
pub const REFRESH_SKEW: Duration = Duration::from_secs(5 * 60);

/// Upper bound on a single token exchange.
pub const TOKEN_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Reset times are displayed in UTC+8 regardless of host timezone.
pub const DISPLAY_UTC_OFFSET_HOURS: i32 = 8;

/// Display value for reset times that are absent or unparseable.
pub const UNKNOWN_RESET_TIME: &str = "Unknown";

/// Convert a duration constant to epoch milliseconds arithmetic.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // the constants above are far below i64::MAX ms
pub const fn duration_ms(duration: Duration) -> i64 {
    duration.as_millis() as i64
}

// =============================================================================
// Credentials
// =============================================================================

/// A caller-owned OAuth credential.
///
/// The cache may rewrite `access_token`, `timestamp` and `expires_in` when it
/// refreshes the token; persisting those changes is up to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: String,
    /// Issued-at, milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Lifetime of `access_token` in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

impl Credential {
    /// Credential holding only a refresh token; the first use will refresh it.
    #[must_use]
    pub fn from_refresh_token(refresh_token: impl Into<String>) -> Self {
        Self {
            refresh_token: refresh_token.into(),
            ..Self::default()
        }
    }

    /// Whether an access token is present at all.
    #[must_use]
    pub fn has_access_token(&self) -> bool {
        self.access_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

// =============================================================================
// Upstream payload
// =============================================================================

/// One resource's entry as returned by the quota source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamQuota {
    #[serde(default)]
    pub remaining: Option<i64>,
    /// Display-oriented reset time, used only when no raw value is given.
    #[serde(default)]
    pub reset_time: Option<String>,
    /// Canonical reset timestamp.
    #[serde(default)]
    pub reset_time_raw: Option<String>,
}

/// Full result of one quota fetch, keyed by resource name.
pub type UpstreamQuotas = HashMap<String, UpstreamQuota>;

// =============================================================================
// Persisted store
// =============================================================================

/// Cached quota for one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaEntry {
    /// Remaining usage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<i64>,
    /// Raw reset timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl From<UpstreamQuota> for QuotaEntry {
    fn from(quota: UpstreamQuota) -> Self {
        Self {
            r: quota.remaining,
            t: quota.reset_time_raw.or(quota.reset_time),
        }
    }
}

/// Quota state for one credential at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSnapshot {
    /// Milliseconds since the Unix epoch.
    pub last_updated: i64,
    #[serde(default)]
    pub models: BTreeMap<String, QuotaEntry>,
}

impl QuotaSnapshot {
    /// Build a snapshot from an upstream response taken at `now_ms`.
    #[must_use]
    pub fn from_upstream(quotas: UpstreamQuotas, now_ms: i64) -> Self {
        Self {
            last_updated: now_ms,
            models: quotas
                .into_iter()
                .map(|(name, quota)| (name, QuotaEntry::from(quota)))
                .collect(),
        }
    }

    /// Age in milliseconds relative to `now_ms` (never negative).
    #[must_use]
    pub const fn age_ms(&self, now_ms: i64) -> i64 {
        let age = now_ms - self.last_updated;
        if age < 0 { 0 } else { age }
    }

    /// Whether the snapshot can be served without revalidation.
    #[must_use]
    pub const fn is_fresh_at(&self, now_ms: i64) -> bool {
        self.age_ms(now_ms) < duration_ms(CACHE_TTL)
    }
}

/// Store bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMeta {
    /// When the last sweep removed anything, ms epoch.
    pub last_cleanup: i64,
    /// Retention window in milliseconds.
    pub ttl: i64,
}

/// The persisted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    pub meta: StoreMeta,
    #[serde(default)]
    pub quotas: HashMap<String, QuotaSnapshot>,
}

impl Store {
    /// An empty store created at `now_ms`.
    #[must_use]
    pub fn empty(now_ms: i64) -> Self {
        Self {
            meta: StoreMeta {
                last_cleanup: now_ms,
                ttl: duration_ms(CLEANUP_TTL),
            },
            quotas: HashMap::new(),
        }
    }

    /// Clamp snapshots stamped in the future back to `now_ms`.
    ///
    /// Returns how many were adjusted.
    pub fn clamp_future_entries(&mut self, now_ms: i64) -> usize {
        let mut clamped = 0;
        for snapshot in self.quotas.values_mut() {
            if snapshot.last_updated > now_ms {
                snapshot.last_updated = now_ms;
                clamped += 1;
            }
        }
        clamped
    }

    /// Remove snapshots last updated before `cutoff_ms`.
    ///
    /// Returns the number removed.
    pub fn remove_older_than(&mut self, cutoff_ms: i64) -> usize {
        let before = self.quotas.len();
        self.quotas.retain(|_, snapshot| snapshot.last_updated >= cutoff_ms);
        before - self.quotas.len()
    }
}

// =============================================================================
// Caller-facing response
// =============================================================================

/// Formatted quota for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelQuota {
    pub remaining: i64,
    /// Localized `MM-DD HH:MM`, or `"Unknown"`.
    pub reset_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_time_raw: Option<String>,
}

/// What `get_quotas` returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    pub last_updated: i64,
    pub models: BTreeMap<String, ModelQuota>,
}
