//! Storage for configuration and the persisted quota store.

pub mod config;
pub mod paths;
pub mod store;

pub use config::{
    CacheConfig, Config, ENV_CLIENT_ID, ENV_CLIENT_SECRET, ENV_CONFIG, ENV_STORE, ENV_TOKEN_URL,
    LoggingConfig, OAuthConfig,
};
pub use paths::AppPaths;
