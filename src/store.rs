//! Shared plumbing for the file-backed stores.
//!
//! Every store owns one JSON file and follows the same discipline:
//! load the whole file, mutate in memory, write the whole file back.
//! There is no partial update and no cross-process transaction protocol
//! beyond whole-file replace; concurrent writers are last-write-wins.
//!
//! An advisory lock file serializes cooperating writers within that
//! limitation. A stale lock is stolen after a bounded wait.

use crate::error::DeployError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// How long to wait for a lock before stealing it.
const LOCK_WAIT_ATTEMPTS: u32 = 20;
const LOCK_WAIT_SPACING: Duration = Duration::from_millis(100);

/// Resolve the default data directory (`~/.slipway`).
pub fn default_data_dir() -> Result<PathBuf, DeployError> {
    let home = dirs::home_dir()
        .ok_or_else(|| DeployError::Storage("could not determine home directory".into()))?;
    Ok(home.join(".slipway"))
}

/// Load a JSON file, degrading to the default value when the file is
/// missing or malformed. Malformed content is a warning, not an error:
/// the store heals itself on the next save.
pub(crate) async fn load_or_default<T>(path: &Path) -> Result<T, DeployError>
where
    T: DeserializeOwned + Default,
{
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => {
            return Err(DeployError::Storage(format!(
                "failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid store file, treating as empty");
            Ok(T::default())
        }
    }
}

/// Write a value as pretty-printed JSON, replacing the whole file.
pub(crate) async fn save_pretty<T: Serialize>(path: &Path, value: &T) -> Result<(), DeployError> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| DeployError::Storage(format!("failed to serialize store: {}", e)))?;

    tokio::fs::write(path, content).await.map_err(|e| {
        DeployError::Storage(format!("failed to write {}: {}", path.display(), e))
    })?;

    Ok(())
}

/// Advisory lock over one store file, held for the span of a
/// read-modify-write cycle. Released on drop.
pub(crate) struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    /// Acquire the lock next to `store_file`. Waits a bounded time for a
    /// holder to release, then steals the lock with a warning so a
    /// crashed writer cannot wedge the store forever.
    pub(crate) async fn acquire(store_file: &Path) -> Result<Self, DeployError> {
        let path = store_file.with_extension("lock");

        for _ in 0..LOCK_WAIT_ATTEMPTS {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    tokio::time::sleep(LOCK_WAIT_SPACING).await;
                }
                Err(e) => {
                    return Err(DeployError::Storage(format!(
                        "failed to create lock {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }

        warn!(path = %path.display(), "stealing stale store lock");
        let _ = std::fs::remove_file(&path);
        std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                DeployError::Storage(format!("failed to create lock {}: {}", path.display(), e))
            })?;

        Ok(Self { path })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let map: BTreeMap<String, String> =
            load_or_default(&dir.path().join("missing.json")).await.unwrap();
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_load_corrupt_file_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("corrupt.json");
        tokio::fs::write(&path, "{not valid json").await.unwrap();

        let map: BTreeMap<String, String> = load_or_default(&path).await.unwrap();
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.json");

        let mut map = BTreeMap::new();
        map.insert("k".to_string(), "v".to_string());
        save_pretty(&path, &map).await.unwrap();

        let back: BTreeMap<String, String> = load_or_default(&path).await.unwrap();
        assert_eq!(back.get("k").map(String::as_str), Some("v"));
    }

    #[tokio::test]
    async fn test_lock_released_on_drop() {
        let dir = tempfile::TempDir::new().unwrap();
        let store_file = dir.path().join("store.json");

        let lock = StoreLock::acquire(&store_file).await.unwrap();
        assert!(store_file.with_extension("lock").exists());
        drop(lock);
        assert!(!store_file.with_extension("lock").exists());

        // Reacquirable after release.
        let _again = StoreLock::acquire(&store_file).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_lock_is_stolen() {
        let dir = tempfile::TempDir::new().unwrap();
        let store_file = dir.path().join("store.json");
        std::fs::write(store_file.with_extension("lock"), "").unwrap();

        // A dead writer's lock must not wedge the store.
        let lock = StoreLock::acquire(&store_file).await.unwrap();
        drop(lock);
        assert!(!store_file.with_extension("lock").exists());
    }
}
