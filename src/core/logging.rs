//! Tracing subscriber setup for embedding applications.
//!
//! The cache itself only emits `tracing` events; installing a subscriber is
//! left to the host. [`init_from_config`] is the convenience path: it resolves
//! `QUOTA_CACHE_LOG*` first, then the `[logging]` config section.

use std::fs::OpenOptions;
use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::storage::config::LoggingConfig;

const LOG_LEVEL_ENV: &str = "QUOTA_CACHE_LOG";
const LOG_FORMAT_ENV: &str = "QUOTA_CACHE_LOG_FORMAT";
const LOG_FILE_ENV: &str = "QUOTA_CACHE_LOG_FILE";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable logs.
    #[default]
    Human,
    /// JSON logs (one event per line).
    Json,
    /// Compact single-line logs.
    Compact,
}

impl LogFormat {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "human" => Some(Self::Human),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "verbose" | "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Convert to tracing filter string.
    #[must_use]
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse log level from `QUOTA_CACHE_LOG`.
#[must_use]
pub fn parse_log_level_from_env() -> Option<LogLevel> {
    env_value(LOG_LEVEL_ENV).and_then(|v| LogLevel::from_arg(&v))
}

/// Parse log format from `QUOTA_CACHE_LOG_FORMAT`.
#[must_use]
pub fn parse_log_format_from_env() -> Option<LogFormat> {
    env_value(LOG_FORMAT_ENV).and_then(|v| LogFormat::from_arg(&v))
}

/// Parse log file path from `QUOTA_CACHE_LOG_FILE`.
#[must_use]
pub fn parse_log_file_from_env() -> Option<PathBuf> {
    env_value(LOG_FILE_ENV).map(PathBuf::from)
}

/// Resolve level and format: environment, then config, then defaults.
#[must_use]
pub fn resolve(config: &LoggingConfig) -> (LogLevel, LogFormat) {
    let level = parse_log_level_from_env()
        .or_else(|| config.level.as_deref().and_then(LogLevel::from_arg))
        .unwrap_or_default();
    let format = parse_log_format_from_env()
        .or_else(|| config.format.as_deref().and_then(LogFormat::from_arg))
        .unwrap_or_default();
    (level, format)
}

/// Install a global subscriber using [`resolve`] and `QUOTA_CACHE_LOG_FILE`.
pub fn init_from_config(config: &LoggingConfig) {
    let (level, format) = resolve(config);
    init(level, format, parse_log_file_from_env());
}

/// Install a global subscriber. A second call is a no-op.
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init(level: LogLevel, format: LogFormat, log_file: Option<PathBuf>) {
    let file = log_file.and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()
    });
    let writer = file.map_or_else(|| BoxMakeWriter::new(std::io::stderr), BoxMakeWriter::new);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("quota_cache={}", level.as_filter())));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);

    match format {
        LogFormat::Json => builder.json().try_init().ok(),
        LogFormat::Compact => builder.compact().with_target(true).try_init().ok(),
        LogFormat::Human => builder.with_target(false).try_init().ok(),
    };
}
