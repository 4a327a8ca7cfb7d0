//! HTTP client utilities.
//!
//! Provides the configured client used by the token exchange.

use std::time::Duration;

use reqwest::{Client, ClientBuilder};

use crate::error::{QuotaCacheError, Result};

/// Default timeout for HTTP requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// User agent sent on every request.
#[must_use]
pub fn user_agent() -> String {
    format!("quota-cache/{}", env!("CARGO_PKG_VERSION"))
}

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn build_client(timeout: Duration) -> Result<Client> {
    ClientBuilder::new()
        .timeout(timeout)
        .user_agent(user_agent())
        .build()
        .map_err(|e| QuotaCacheError::Other(anyhow::anyhow!("build HTTP client: {e}")))
}

/// Describe a transport error, calling out timeouts explicitly.
#[must_use]
pub fn describe_transport_error(err: &reqwest::Error, timeout: Duration) -> String {
    if err.is_timeout() {
        format!("request timed out after {}s", timeout.as_secs())
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_carries_version() {
        assert!(user_agent().starts_with("quota-cache/"));
    }

    #[test]
    fn build_client_succeeds() {
        assert!(build_client(DEFAULT_TIMEOUT).is_ok());
    }
}
