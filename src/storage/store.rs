//! Durable storage for the quota [`Store`] document.
//!
//! # Features
//! - Atomic writes using temp file + rename (prevents torn documents)
//! - Graceful degradation on missing/corrupt state: `load` falls back to an
//!   empty store and `save` logs instead of failing
//!
//! The fallible `try_load`/`try_save` are exposed for callers that want the
//! error itself.

use std::io::{ErrorKind, Write};
use std::path::Path;

use crate::core::models::Store;
use crate::error::{QuotaCacheError, Result};
use crate::util::time::now_ms;

/// Read and parse the store at `path`.
///
/// # Errors
///
/// Returns [`QuotaCacheError::Load`] if the file is missing, unreadable, or
/// not a well-formed store document.
pub fn try_load(path: &Path) -> Result<Store> {
    let load_error = |reason: String| QuotaCacheError::Load {
        path: path.display().to_string(),
        reason,
    };
    let content = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| load_error(e.to_string()))
}

/// Load the store, falling back to an empty one.
///
/// The fallback is logged, never returned; the `bool` reports whether it
/// happened for a reason other than the file simply not existing yet.
pub fn load(path: &Path) -> (Store, bool) {
    let now = now_ms();
    match try_load(path) {
        Ok(mut store) => {
            let clamped = store.clamp_future_entries(now);
            if clamped > 0 {
                tracing::debug!(?path, clamped, "Clamped future-dated quota snapshots");
            }
            tracing::debug!(?path, entries = store.quotas.len(), "Loaded quota store");
            (store, false)
        }
        Err(_) if !path.exists() => {
            tracing::debug!(?path, "Quota store not found, starting empty");
            (Store::empty(now), false)
        }
        Err(e) => {
            tracing::warn!(?path, error = %e, "Quota store unreadable, starting empty");
            (Store::empty(now), true)
        }
    }
}

/// Serialize and write the store atomically, creating parent directories.
///
/// # Errors
///
/// Returns [`QuotaCacheError::Save`] if serialization or any filesystem step
/// fails.
pub fn try_save(path: &Path, store: &Store) -> Result<()> {
    let save_error = |reason: String| QuotaCacheError::Save {
        path: path.display().to_string(),
        reason,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| save_error(e.to_string()))?;
    }

    let content = serde_json::to_string_pretty(store).map_err(|e| save_error(e.to_string()))?;
    write_atomic(path, content.as_bytes()).map_err(|e| save_error(e.to_string()))
}

/// Best-effort save. Returns `false` (after logging) if the write failed.
pub fn save(path: &Path, store: &Store) -> bool {
    match try_save(path, store) {
        Ok(()) => {
            tracing::trace!(?path, entries = store.quotas.len(), "Saved quota store");
            true
        }
        Err(e) => {
            tracing::warn!(?path, error = %e, "Failed to persist quota store");
            false
        }
    }
}

/// Write bytes atomically using temp file + rename.
fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    // Temp file must sit in the same directory for the rename to be atomic
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "store path has no file name"))?;
    let temp_path = parent.join(format!(".{file_name}.tmp.{}", std::process::id()));

    {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    std::fs::rename(&temp_path, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&temp_path);
    })
}
