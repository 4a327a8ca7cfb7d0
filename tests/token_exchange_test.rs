//! Integration tests for the OAuth token exchange against a mock endpoint.
//!
//! Verifies:
//! - The form-encoded request body and fixed headers
//! - Error description mapping (`error_description`, then `error`, then status)
//! - Credential mutation on success only

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use quota_cache::core::credentials::{CredentialRefresher, OAuthTokenExchange, TokenExchange};
use quota_cache::error::QuotaCacheError;
use quota_cache::storage::OAuthConfig;
use quota_cache::Credential;

use common::log_capture::TestLogCapture;

async fn exchange_for(server: &MockServer) -> OAuthTokenExchange {
    let config = OAuthConfig {
        token_url: format!("{}/token", server.uri()),
        client_id: "client-abc".to_string(),
        client_secret: "secret-xyz".to_string(),
        timeout_seconds: 5,
    };
    OAuthTokenExchange::from_config(&config).expect("client build")
}

// =============================================================================
// Request Shape
// =============================================================================

#[tokio::test]
async fn exchange_posts_refresh_grant_form() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("accept", "application/json"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("client_id=client-abc"))
        .and(body_string_contains("client_secret=secret-xyz"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-new",
            "expires_in": 1800,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let exchange = exchange_for(&server).await;
    let grant = exchange.exchange("rt-123").await.expect("exchange should succeed");

    assert_eq!(grant.access_token, "at-new");
    assert_eq!(grant.expires_in, 1800);
}

#[tokio::test]
async fn exchange_sends_versioned_user_agent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(header(
            "user-agent",
            format!("quota-cache/{}", env!("CARGO_PKG_VERSION")).as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let exchange = exchange_for(&server).await;
    assert!(exchange.exchange("rt").await.is_ok());
}

// =============================================================================
// Error Mapping
// =============================================================================

#[tokio::test]
async fn error_description_is_preferred() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked."
        })))
        .mount(&server)
        .await;

    let err = exchange_for(&server).await.exchange("rt").await.unwrap_err();

    assert!(matches!(err, QuotaCacheError::Refresh(_)));
    assert!(err.to_string().contains("Token has been expired or revoked."));
}

#[tokio::test]
async fn error_code_used_without_description() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client"
        })))
        .mount(&server)
        .await;

    let err = exchange_for(&server).await.exchange("rt").await.unwrap_err();

    assert!(err.to_string().contains("invalid_client"));
}

#[tokio::test]
async fn status_used_for_opaque_failures() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("<html>unavailable</html>"))
        .mount(&server)
        .await;

    let err = exchange_for(&server).await.exchange("rt").await.unwrap_err();

    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn success_without_access_token_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "expires_in": 3600 })))
        .mount(&server)
        .await;

    let err = exchange_for(&server).await.exchange("rt").await.unwrap_err();

    assert!(err.to_string().contains("no access_token"));
}

#[tokio::test]
async fn slow_endpoint_times_out_as_refresh_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "late", "expires_in": 3600 }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let exchange = OAuthTokenExchange::new(
        format!("{}/token", server.uri()),
        "client",
        "secret",
        Duration::from_secs(30),
    )
    .expect("client build");
    let refresher =
        CredentialRefresher::new(Arc::new(exchange)).with_timeout(Duration::from_millis(200));
    let mut credential = Credential::from_refresh_token("rt");

    let err = refresher.refresh(&mut credential).await.unwrap_err();

    assert!(matches!(err, QuotaCacheError::Refresh(_)));
    assert!(err.to_string().contains("timed out"));
    assert!(credential.access_token.is_none());
}

// =============================================================================
// Refresher Integration
// =============================================================================

#[tokio::test]
async fn refresher_updates_credential_from_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-fresh",
            "expires_in": 3599
        })))
        .mount(&server)
        .await;

    let refresher = CredentialRefresher::new(Arc::new(exchange_for(&server).await));
    let mut credential = Credential::from_refresh_token("rt");

    refresher.refresh(&mut credential).await.expect("refresh should succeed");

    assert_eq!(credential.access_token.as_deref(), Some("at-fresh"));
    assert_eq!(credential.expires_in, Some(3599));
    assert!(credential.timestamp.is_some());
    assert!(!quota_cache::core::needs_refresh(&credential));
}

#[tokio::test]
async fn refresher_failure_leaves_credential_untouched() {
    let capture = TestLogCapture::start();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant"
        })))
        .mount(&server)
        .await;

    let refresher = CredentialRefresher::new(Arc::new(exchange_for(&server).await));
    let mut credential = Credential {
        access_token: Some("old".to_string()),
        refresh_token: "rt-secret".to_string(),
        timestamp: Some(1),
        expires_in: Some(3600),
    };
    let before = credential.clone();

    assert!(refresher.refresh(&mut credential).await.is_err());
    assert_eq!(credential, before);
    capture.assert_never_mentioned("rt-secret");
}

#[tokio::test]
async fn empty_refresh_token_makes_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let refresher = CredentialRefresher::new(Arc::new(exchange_for(&server).await));
    let mut credential = Credential::from_refresh_token("");

    let err = refresher.refresh(&mut credential).await.unwrap_err();
    assert!(err.to_string().contains("no refresh token"));
}
