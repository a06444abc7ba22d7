//! Content fingerprinting for change detection.
//!
//! A deployment descriptor is redeployed only when its digest changes.
//! An unreadable descriptor hashes to the empty sentinel, which never
//! matches a recorded digest, so callers fall through to "update needed".

use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::warn;

/// SHA-256 hex digest of a byte slice.
pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of a file's raw bytes.
///
/// Returns the empty string when the file cannot be read. Callers treat
/// the sentinel as "change always detected" rather than an error.
pub async fn digest_file(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    match tokio::fs::read(path).await {
        Ok(bytes) => digest_bytes(&bytes),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "descriptor not readable, forcing update");
            String::new()
        }
    }
}
