//! Credential fingerprints for logs and error messages.
//!
//! Credential ids never appear verbatim in logs. A short SHA-256 prefix is
//! stable across runs and correlates log lines for one credential.

use sha2::{Digest, Sha256};

/// Number of digest bytes kept (12 hex chars).
const FINGERPRINT_BYTES: usize = 6;

/// Stable, non-reversible short identifier for a credential id.
#[must_use]
pub fn fingerprint(credential_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"quota-cache:");
    hasher.update(credential_id.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..FINGERPRINT_BYTES])
}
