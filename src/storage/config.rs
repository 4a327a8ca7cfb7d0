//! Configuration file loading and management.
//!
//! Loads configuration from:
//! - Linux: `~/.config/quota-cache/config.toml`
//! - macOS: `~/Library/Application Support/dev.quota-cache.quota-cache/config.toml`
//! - Windows: `%APPDATA%/quota-cache/quota-cache/config/config.toml`
//!
//! ## Precedence
//!
//! 1. Environment variables
//! 2. Config file
//! 3. Built-in defaults
//!
//! ## Environment Variables
//!
//! - `QUOTA_CACHE_CONFIG`: Override config file path
//! - `QUOTA_CACHE_STORE`: Override the quota store path
//! - `QUOTA_CACHE_TOKEN_URL`: OAuth token endpoint
//! - `QUOTA_CACHE_CLIENT_ID`: OAuth client id
//! - `QUOTA_CACHE_CLIENT_SECRET`: OAuth client secret

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::error::{QuotaCacheError, Result};

// =============================================================================
// Environment Variable Names
// =============================================================================

/// Environment variable to override config file path.
pub const ENV_CONFIG: &str = "QUOTA_CACHE_CONFIG";
/// Environment variable to override the quota store path.
pub const ENV_STORE: &str = "QUOTA_CACHE_STORE";
/// Environment variable for the OAuth token endpoint.
pub const ENV_TOKEN_URL: &str = "QUOTA_CACHE_TOKEN_URL";
/// Environment variable for the OAuth client id.
pub const ENV_CLIENT_ID: &str = "QUOTA_CACHE_CLIENT_ID";
/// Environment variable for the OAuth client secret.
pub const ENV_CLIENT_SECRET: &str = "QUOTA_CACHE_CLIENT_SECRET";

/// Default OAuth2 token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Allowed range for every timeout setting, in seconds.
const TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 1..=300;

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub oauth: OAuthConfig,
    pub logging: LoggingConfig,
}

/// Cache storage and upstream settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Quota store location; defaults to the data directory.
    pub store_path: Option<PathBuf>,
    /// Deadline for one quota fetch.
    pub fetch_timeout_seconds: u64,
}

/// OAuth client identity used for token refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub timeout_seconds: u64,
}

/// Logging defaults (overridden by `QUOTA_CACHE_LOG*`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// error, warn, info, debug, trace
    pub level: Option<String>,
    /// human, json, compact
    pub format: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            fetch_timeout_seconds: 30,
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            token_url: DEFAULT_TOKEN_URL.to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            timeout_seconds: 30,
        }
    }
}

impl CacheConfig {
    /// Resolved store path.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| AppPaths::new().quota_store_file())
    }

    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

impl Config {
    /// Load configuration from `QUOTA_CACHE_CONFIG` or the default path, then
    /// apply environment overrides and validate.
    ///
    /// Returns defaults if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but is invalid, or the result fails
    /// validation.
    pub fn load() -> Result<Self> {
        let path = std::env::var(ENV_CONFIG)
            .map_or_else(|_| Self::config_path(), PathBuf::from);
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    ///
    /// Returns default config if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns error only if the file exists but is invalid.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(?path, "Loading config file");
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| QuotaCacheError::Config(format!("Invalid config file: {e}")))
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| QuotaCacheError::Config(format!("Failed to serialize config: {e}")))?;

        fs::write(path, content)?;
        tracing::debug!(?path, "Config file saved");
        Ok(())
    }

    /// Get the default config file path.
    #[must_use]
    pub fn config_path() -> PathBuf {
        AppPaths::new().config_file()
    }

    /// Apply `QUOTA_CACHE_*` overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(store) = env_non_empty(ENV_STORE) {
            self.cache.store_path = Some(PathBuf::from(store));
        }
        if let Some(url) = env_non_empty(ENV_TOKEN_URL) {
            self.oauth.token_url = url;
        }
        if let Some(id) = env_non_empty(ENV_CLIENT_ID) {
            self.oauth.client_id = id;
        }
        if let Some(secret) = env_non_empty(ENV_CLIENT_SECRET) {
            self.oauth.client_secret = secret;
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns error if a timeout is outside 1-300 seconds or the token
    /// endpoint is not an http(s) URL.
    pub fn validate(&self) -> Result<()> {
        if !TIMEOUT_RANGE.contains(&self.cache.fetch_timeout_seconds) {
            return Err(QuotaCacheError::Config(
                "cache.fetch_timeout_seconds must be between 1 and 300".to_string(),
            ));
        }
        if !TIMEOUT_RANGE.contains(&self.oauth.timeout_seconds) {
            return Err(QuotaCacheError::Config(
                "oauth.timeout_seconds must be between 1 and 300".to_string(),
            ));
        }
        let url = self.oauth.token_url.as_str();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(QuotaCacheError::Config(format!(
                "Invalid oauth.token_url \"{url}\": expected an http(s) URL"
            )));
        }
        Ok(())
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    /// Helper to set an environment variable in tests.
    #[allow(unsafe_code)]
    fn set_env(key: &str, value: &str) {
        // SAFETY: callers hold ENV_LOCK
        unsafe { std::env::set_var(key, value) };
    }

    #[allow(unsafe_code)]
    fn remove_env(key: &str) {
        // SAFETY: callers hold ENV_LOCK
        unsafe { std::env::remove_var(key) };
    }

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(config.oauth.token_url, DEFAULT_TOKEN_URL);
    }

    #[test]
    fn load_missing_file_returns_default() {
        let config = Config::load_from(Path::new("/nonexistent/path/config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_valid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[cache]
store_path = "/var/lib/quota/quotas.json"
fetch_timeout_seconds = 10

[oauth]
client_id = "client-123"
client_secret = "shh"

[logging]
level = "debug"
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(
            config.cache.store_path(),
            PathBuf::from("/var/lib/quota/quotas.json")
        );
        assert_eq!(config.cache.fetch_timeout_seconds, 10);
        assert_eq!(config.oauth.client_id, "client-123");
        assert_eq!(config.oauth.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(config.oauth.timeout_seconds, 30);
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "this is not valid toml {{{{").unwrap();

        let err = Config::load_from(file.path()).unwrap_err();
        assert!(matches!(err, QuotaCacheError::Config(_)));
    }

    #[test]
    fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.cache.fetch_timeout_seconds = 45;
        config.oauth.client_id = "abc".to_string();

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn validate_timeout_bounds() {
        let mut config = Config::default();
        config.cache.fetch_timeout_seconds = 0;
        assert!(config.validate().unwrap_err().to_string().contains("between 1 and 300"));

        let mut config = Config::default();
        config.oauth.timeout_seconds = 301;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_http_token_url() {
        let mut config = Config::default();
        config.oauth.token_url = "ftp://example.com/token".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Invalid oauth.token_url"));
    }

    #[test]
    fn env_overrides_file_values() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_env(ENV_STORE, "/tmp/override/quotas.json");
        set_env(ENV_CLIENT_ID, "from-env");
        set_env(ENV_CLIENT_SECRET, "  ");

        let mut config = Config::default();
        config.oauth.client_secret = "from-file".to_string();
        config.apply_env_overrides();

        remove_env(ENV_STORE);
        remove_env(ENV_CLIENT_ID);
        remove_env(ENV_CLIENT_SECRET);

        assert_eq!(
            config.cache.store_path,
            Some(PathBuf::from("/tmp/override/quotas.json"))
        );
        assert_eq!(config.oauth.client_id, "from-env");
        // Blank values are ignored
        assert_eq!(config.oauth.client_secret, "from-file");
    }

    #[test]
    fn load_honours_config_env_path() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nfetch_timeout_seconds = 12").unwrap();
        set_env(ENV_CONFIG, &file.path().display().to_string());

        let result = Config::load();
        remove_env(ENV_CONFIG);

        assert_eq!(result.unwrap().cache.fetch_timeout_seconds, 12);
    }
}
