//! Access-token expiry checks and refresh-token exchange.
//!
//! The cache refreshes a credential before revalidating when its access token
//! is missing or within [`REFRESH_SKEW`] of expiry. The exchange itself sits
//! behind [`TokenExchange`]; [`OAuthTokenExchange`] is the HTTP
//! implementation against a standard OAuth2 token endpoint.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;

use crate::core::http::{build_client, describe_transport_error};
use crate::core::models::{Credential, REFRESH_SKEW, TOKEN_EXCHANGE_TIMEOUT, duration_ms};
use crate::error::{QuotaCacheError, Result};
use crate::storage::config::OAuthConfig;
use crate::util::time::now_ms;

/// Lifetime assumed when a token endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

// =============================================================================
// Expiry
// =============================================================================

/// Whether the access token is expired or close enough to expiry to refresh.
///
/// A credential without `timestamp` or `expires_in` is always expired.
#[must_use]
pub fn is_expired_at(credential: &Credential, now_ms: i64) -> bool {
    let (Some(issued_at), Some(expires_in)) = (credential.timestamp, credential.expires_in) else {
        return true;
    };
    let refresh_at = issued_at
        .saturating_add(expires_in.saturating_mul(1000))
        .saturating_sub(duration_ms(REFRESH_SKEW));
    now_ms >= refresh_at
}

/// [`is_expired_at`] against the current time.
#[must_use]
pub fn is_expired(credential: &Credential) -> bool {
    is_expired_at(credential, now_ms())
}

/// Whether a revalidation must refresh the credential first.
#[must_use]
pub fn needs_refresh(credential: &Credential) -> bool {
    !credential.has_access_token() || is_expired(credential)
}

// =============================================================================
// Token exchange seam
// =============================================================================

/// A freshly issued access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
}

/// Exchanges a refresh token for a new access token.
///
/// Each call must request a new token, so retrying is always safe.
pub trait TokenExchange: Send + Sync {
    fn exchange<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenGrant>>;
}

// =============================================================================
// OAuth2 implementation
// =============================================================================

/// Token endpoint response. Success and failure share one shape.
#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenResponse {
    /// Prefer the human description over the bare error code.
    fn error_message(&self) -> Option<String> {
        self.error_description
            .clone()
            .filter(|d| !d.is_empty())
            .or_else(|| self.error.clone().filter(|e| !e.is_empty()))
    }
}

/// `grant_type=refresh_token` exchange against an OAuth2 token endpoint.
#[derive(Debug, Clone)]
pub struct OAuthTokenExchange {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    timeout: Duration,
}

impl OAuthTokenExchange {
    /// Create an exchange for the given client identity.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            timeout,
        })
    }

    /// Create an exchange from the `[oauth]` config section.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn from_config(config: &OAuthConfig) -> Result<Self> {
        Self::new(
            &config.token_url,
            &config.client_id,
            &config.client_secret,
            Duration::from_secs(config.timeout_seconds),
        )
    }

    async fn request_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| QuotaCacheError::Refresh(describe_transport_error(&e, self.timeout)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| QuotaCacheError::Refresh(describe_transport_error(&e, self.timeout)))?;
        let parsed: Option<TokenResponse> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let message = parsed
                .as_ref()
                .and_then(TokenResponse::error_message)
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(QuotaCacheError::Refresh(message));
        }

        let parsed = parsed.ok_or_else(|| {
            QuotaCacheError::Refresh("token endpoint returned a non-JSON body".to_string())
        })?;
        if let Some(message) = parsed.error_message() {
            return Err(QuotaCacheError::Refresh(message));
        }
        match parsed.access_token {
            Some(access_token) if !access_token.is_empty() => Ok(TokenGrant {
                access_token,
                expires_in: parsed.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
            }),
            _ => Err(QuotaCacheError::Refresh(
                "token endpoint response had no access_token".to_string(),
            )),
        }
    }
}

impl TokenExchange for OAuthTokenExchange {
    fn exchange<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenGrant>> {
        self.request_token(refresh_token).boxed()
    }
}

// =============================================================================
// Refresher
// =============================================================================

/// Applies token exchanges to caller-owned credentials.
#[derive(Clone)]
pub struct CredentialRefresher {
    exchange: Arc<dyn TokenExchange>,
    timeout: Duration,
}

impl std::fmt::Debug for CredentialRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRefresher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CredentialRefresher {
    #[must_use]
    pub fn new(exchange: Arc<dyn TokenExchange>) -> Self {
        Self {
            exchange,
            timeout: TOKEN_EXCHANGE_TIMEOUT,
        }
    }

    /// Refresher whose deadline is the `[oauth] timeout_seconds` setting.
    #[must_use]
    pub fn from_config(config: &OAuthConfig, exchange: Arc<dyn TokenExchange>) -> Self {
        Self::new(exchange).with_timeout(Duration::from_secs(config.timeout_seconds))
    }

    /// Override the exchange deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Exchange the credential's refresh token and update it in place.
    ///
    /// Issues exactly one exchange. On failure the credential is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`QuotaCacheError::Refresh`] if there is no refresh token, the
    /// exchange fails, or it does not finish within the deadline.
    pub async fn refresh(&self, credential: &mut Credential) -> Result<()> {
        if credential.refresh_token.trim().is_empty() {
            return Err(QuotaCacheError::Refresh(
                "credential has no refresh token".to_string(),
            ));
        }

        let exchange = self.exchange.exchange(&credential.refresh_token);
        let grant = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                QuotaCacheError::Refresh(format!(
                    "token exchange timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(into_refresh_error)?;

        credential.access_token = Some(grant.access_token);
        credential.expires_in = Some(grant.expires_in);
        credential.timestamp = Some(now_ms());
        Ok(())
    }
}

fn into_refresh_error(err: QuotaCacheError) -> QuotaCacheError {
    match err {
        QuotaCacheError::Refresh(_) => err,
        other => QuotaCacheError::Refresh(other.to_string()),
    }
}
