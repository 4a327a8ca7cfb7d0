//! Error types for quota-cache.
//!
//! Uses `thiserror` for structured error types.
//!
//! ## Error Taxonomy
//!
//! - **Storage**: the persisted store could not be read (`Load`) or written
//!   (`Save`). Both are recovered locally and only ever logged.
//! - **Authentication**: the token exchange failed (`Refresh`).
//! - **Upstream**: the quota fetch failed or returned nothing (`Upstream`).
//! - **Fetch**: the only error `get_quotas` surfaces. Revalidation failed and
//!   there was no cached snapshot to fall back on.
//! - **Configuration** and **Internal** for everything else.
//!
//! Each error has a stable error code (e.g., `QC-A001`) for programmatic handling.

use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Token exchange or credential problems.
    Authentication,
    /// The remote quota API failed.
    Upstream,
    /// Reading or writing the persisted store failed.
    Storage,
    /// Config file parsing or validation.
    Configuration,
    /// Unexpected errors, bugs, or unclassified issues.
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Authentication => "Authentication error",
            Self::Upstream => "Upstream error",
            Self::Storage => "Storage error",
            Self::Configuration => "Configuration error",
            Self::Internal => "Internal error",
        }
    }

    /// Returns a short code prefix for this category.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::Authentication => "A",
            Self::Upstream => "U",
            Self::Storage => "S",
            Self::Configuration => "C",
            Self::Internal => "X",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Main error type for quota-cache operations.
#[derive(Error, Debug)]
pub enum QuotaCacheError {
    // ==========================================================================
    // Storage errors
    // ==========================================================================
    /// The persisted store was missing, unreadable, or malformed.
    #[error("failed to load quota store from {path}: {reason}")]
    Load { path: String, reason: String },

    /// The persisted store could not be written.
    #[error("failed to save quota store to {path}: {reason}")]
    Save { path: String, reason: String },

    // ==========================================================================
    // Revalidation errors
    // ==========================================================================
    /// Exchanging the refresh token for a new access token failed.
    #[error("token refresh failed: {0}")]
    Refresh(String),

    /// The quota fetch failed, timed out, or returned no data.
    #[error("quota fetch failed: {0}")]
    Upstream(String),

    /// Revalidation failed and nothing was cached for the credential.
    #[error("no quota data available for credential {credential}: {source}")]
    Fetch {
        /// Fingerprint of the credential id, never the raw id.
        credential: String,
        source: Box<QuotaCacheError>,
    },

    // ==========================================================================
    // Configuration errors
    // ==========================================================================
    #[error("configuration error: {0}")]
    Config(String),

    // ==========================================================================
    // Internal errors
    // ==========================================================================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl QuotaCacheError {
    /// Returns the error category for classification and routing.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Refresh(_) => ErrorCategory::Authentication,
            Self::Upstream(_) => ErrorCategory::Upstream,
            Self::Fetch { source, .. } => source.category(),
            Self::Load { .. } | Self::Save { .. } => ErrorCategory::Storage,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Io(_) | Self::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Returns a stable error code for programmatic handling.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Refresh(_) => "QC-A001",
            Self::Upstream(_) => "QC-U001",
            Self::Fetch { .. } => "QC-U010",
            Self::Load { .. } => "QC-S001",
            Self::Save { .. } => "QC-S002",
            Self::Config(_) => "QC-C001",
            Self::Io(_) => "QC-X001",
            Self::Other(_) => "QC-X099",
        }
    }

    /// Returns whether asking again later could plausibly succeed.
    ///
    /// Upstream outages and token exchange failures are transient from the
    /// cache's point of view; a `Fetch` error inherits from its root cause.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Refresh(_) | Self::Upstream(_) | Self::Save { .. } => true,
            Self::Fetch { source, .. } => source.is_retryable(),
            Self::Load { .. }
            | Self::Config(_)
            | Self::Io(_)
            | Self::Other(_) => false,
        }
    }

    /// The innermost cause of a `Fetch` error, or `self` for anything else.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Fetch { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type alias for quota-cache operations.
pub type Result<T> = std::result::Result<T, QuotaCacheError>;
