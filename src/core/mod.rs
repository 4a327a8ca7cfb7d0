//! Cache engine, credential handling, and data models.

pub mod credential_hash;
pub mod credentials;
pub mod engine;
pub mod eviction;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod models;

pub use credential_hash::fingerprint;
pub use credentials::{
    CredentialRefresher, OAuthTokenExchange, TokenExchange, TokenGrant, is_expired, needs_refresh,
};
pub use engine::{QuotaCache, QuotaSource, format_snapshot};
pub use eviction::EvictionTask;
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use models::{
    CACHE_TTL, CLEANUP_TTL, Credential, ModelQuota, QuotaEntry, QuotaResponse, QuotaSnapshot,
    Store, StoreMeta, UpstreamQuota, UpstreamQuotas,
};
