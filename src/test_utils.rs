//! Test utilities for quota-cache.
//!
//! Provides scripted doubles for the two outbound seams and test data
//! factories, for use across unit and integration tests.
//!
//! # Usage
//!
//! ```rust,ignore
//! use quota_cache::test_utils::*;
//!
//! let source = Arc::new(ScriptedQuotaSource::new());
//! source.push_ok(make_test_upstream(&[("gpt-x", Some(5), None)]));
//! let exchange = Arc::new(ScriptedTokenExchange::succeeding("token", 3600));
//! let dir = TestDir::new();
//! let cache = make_test_cache(&dir, &source, &exchange);
//! ```

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::core::credentials::{CredentialRefresher, TokenExchange, TokenGrant};
use crate::core::engine::{QuotaCache, QuotaSource};
use crate::core::models::{Credential, QuotaEntry, QuotaSnapshot, UpstreamQuota, UpstreamQuotas};
use crate::error::{QuotaCacheError, Result};
use crate::util::time::now_ms;

// =============================================================================
// Test Data Factories
// =============================================================================

/// A credential with a live access token (issued now, valid for an hour).
#[must_use]
pub fn make_test_credential() -> Credential {
    Credential {
        access_token: Some("test-access-token".to_string()),
        refresh_token: "test-refresh-token".to_string(),
        timestamp: Some(now_ms()),
        expires_in: Some(3600),
    }
}

/// A credential whose access token expired long ago.
#[must_use]
pub fn make_expired_credential() -> Credential {
    Credential {
        access_token: Some("stale-access-token".to_string()),
        refresh_token: "test-refresh-token".to_string(),
        timestamp: Some(now_ms() - 2 * 3_600_000),
        expires_in: Some(3600),
    }
}

/// A snapshot taken at `last_updated` with `(model, remaining, reset)` rows.
#[must_use]
pub fn make_test_snapshot(
    last_updated: i64,
    models: &[(&str, Option<i64>, Option<&str>)],
) -> QuotaSnapshot {
    QuotaSnapshot {
        last_updated,
        models: models
            .iter()
            .map(|(name, r, t)| {
                (
                    (*name).to_string(),
                    QuotaEntry {
                        r: *r,
                        t: t.map(str::to_string),
                    },
                )
            })
            .collect(),
    }
}

/// An upstream response with `(model, remaining, reset_time_raw)` rows.
#[must_use]
pub fn make_test_upstream(models: &[(&str, Option<i64>, Option<&str>)]) -> UpstreamQuotas {
    models
        .iter()
        .map(|(name, remaining, raw)| {
            (
                (*name).to_string(),
                UpstreamQuota {
                    remaining: *remaining,
                    reset_time: None,
                    reset_time_raw: raw.map(str::to_string),
                },
            )
        })
        .collect()
}

// =============================================================================
// Scripted Doubles
// =============================================================================

/// One scripted quota-source reply.
#[derive(Debug, Clone)]
pub enum QuotaOutcome {
    Ok(UpstreamQuotas),
    Err(String),
    /// Never resolves.
    Hang,
}

/// [`QuotaSource`] that replays queued outcomes in order.
///
/// An exhausted queue answers with an error.
#[derive(Debug, Default)]
pub struct ScriptedQuotaSource {
    outcomes: Mutex<VecDeque<QuotaOutcome>>,
    calls: AtomicUsize,
    last_access_token: Mutex<Option<String>>,
    delay: Option<Duration>,
}

impl ScriptedQuotaSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every reply by `delay` (tokio time).
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, outcome: QuotaOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }

    pub fn push_ok(&self, quotas: UpstreamQuotas) {
        self.push(QuotaOutcome::Ok(quotas));
    }

    pub fn push_err(&self, message: &str) {
        self.push(QuotaOutcome::Err(message.to_string()));
    }

    pub fn push_hang(&self) {
        self.push(QuotaOutcome::Hang);
    }

    /// Number of fetches issued so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Access token presented on the most recent fetch.
    #[must_use]
    pub fn last_access_token(&self) -> Option<String> {
        self.last_access_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl QuotaSource for ScriptedQuotaSource {
    fn fetch_quotas<'a>(
        &'a self,
        credential: &'a Credential,
    ) -> BoxFuture<'a, anyhow::Result<UpstreamQuotas>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .last_access_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = credential.access_token.clone();
        let outcome = self
            .outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let delay = self.delay;

        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match outcome {
                Some(QuotaOutcome::Ok(quotas)) => Ok(quotas),
                Some(QuotaOutcome::Err(message)) => Err(anyhow::anyhow!(message)),
                Some(QuotaOutcome::Hang) => futures::future::pending().await,
                None => Err(anyhow::anyhow!("no scripted quota response left")),
            }
        }
        .boxed()
    }
}

/// [`TokenExchange`] that always answers the same way.
#[derive(Debug)]
pub struct ScriptedTokenExchange {
    outcome: std::result::Result<TokenGrant, String>,
    calls: AtomicUsize,
}

impl ScriptedTokenExchange {
    #[must_use]
    pub fn succeeding(access_token: &str, expires_in: i64) -> Self {
        Self {
            outcome: Ok(TokenGrant {
                access_token: access_token.to_string(),
                expires_in,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TokenExchange for ScriptedTokenExchange {
    fn exchange<'a>(&'a self, _refresh_token: &'a str) -> BoxFuture<'a, Result<TokenGrant>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcome.clone().map_err(QuotaCacheError::Refresh);
        async move { outcome }.boxed()
    }
}

/// A cache backed by `quotas.json` inside `dir`.
#[must_use]
pub fn make_test_cache(
    dir: &TestDir,
    source: &Arc<ScriptedQuotaSource>,
    exchange: &Arc<ScriptedTokenExchange>,
) -> QuotaCache {
    QuotaCache::new(
        dir.file_path("quotas.json"),
        source.clone(),
        CredentialRefresher::new(exchange.clone()),
    )
}

// =============================================================================
// Temporary Directories
// =============================================================================

/// An isolated temporary directory, removed on drop.
pub struct TestDir {
    inner: tempfile::TempDir,
}

impl TestDir {
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: tempfile::tempdir().expect("Failed to create temp directory"),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Create a file with `content`, creating parent directories.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.file_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(&path, content).expect("Failed to write test file");
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_file(&self, name: &str) -> std::io::Result<String> {
        std::fs::read_to_string(self.file_path(name))
    }

    #[must_use]
    pub fn file_exists(&self, name: &str) -> bool {
        self.file_path(name).exists()
    }

    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.inner.path().join(name)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
