//! quota-cache - durable per-credential quota snapshot cache.
//!
//! Serves recent quota data for a credential, revalidating it against an
//! upstream [`QuotaSource`] at most every five minutes, refreshing OAuth
//! access tokens on demand, and falling back to the last known snapshot when
//! the upstream is unavailable. State survives restarts in a JSON file and a
//! background [`EvictionTask`] drops snapshots untouched for an hour.
//!
//! ```rust,ignore
//! let config = Config::load()?;
//! let exchange = Arc::new(OAuthTokenExchange::from_config(&config.oauth)?);
//! let refresher = CredentialRefresher::from_config(&config.oauth, exchange);
//! let cache = Arc::new(QuotaCache::open(&config, Arc::new(MySource), refresher));
//! let eviction = EvictionTask::spawn(Arc::clone(&cache));
//!
//! let quotas = cache.get_quotas("account-1", &mut credential).await?;
//! ```

// Note: deny (not forbid) to allow #[allow(unsafe_code)] in test helpers for env var manipulation
#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod core;
pub mod error;
pub mod storage;
pub mod util;

/// Test utilities module - included in test builds or when test-utils feature is enabled.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crate::core::{
    Credential, CredentialRefresher, EvictionTask, OAuthTokenExchange, QuotaCache, QuotaResponse,
    QuotaSource, TokenExchange, UpstreamQuota, UpstreamQuotas,
};
pub use error::{ErrorCategory, QuotaCacheError, Result};
pub use storage::Config;
