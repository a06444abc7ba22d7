//! Current-state store for idempotent deployments.
//!
//! One entry per (host, service), keyed in `deployment_state.json`.
//! The entry answers a single question: does this host need updating?

use crate::error::DeployError;
use crate::store::{self, StoreLock};
use crate::types::{ServiceStatus, StateEntry};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{error, info};

/// Service name used when the caller does not supply one.
pub const DEFAULT_SERVICE: &str = "default";

/// Policy for `needs_update` when a prior attempt exists.
///
/// The reference behavior short-circuits on a digest match against any
/// prior entry, even one whose last attempt failed. That is permissive
/// and possibly unintended, so both readings are available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Match the recorded digest regardless of the entry's status.
    #[default]
    MatchAnyRecorded,
    /// A prior failed attempt always needs an update, digest match or not.
    RequireDeployed,
}

type StateMap = BTreeMap<String, BTreeMap<String, StateEntry>>;

/// File-backed deployment state store.
///
/// Every mutating call is a full read-modify-write of the backing file,
/// guarded by an advisory lock. Writers from processes that do not honor
/// the lock are last-write-wins.
pub struct StateStore {
    state_file: PathBuf,
    policy: UpdatePolicy,
}

impl StateStore {
    /// Open a store under the default data dir (`~/.slipway`).
    pub async fn open_default() -> Result<Self, DeployError> {
        Self::open(store::default_data_dir()?).await
    }

    /// Open a store under a custom directory.
    pub async fn open(state_dir: PathBuf) -> Result<Self, DeployError> {
        tokio::fs::create_dir_all(&state_dir)
            .await
            .map_err(|e| DeployError::Storage(format!("failed to create state dir: {}", e)))?;

        Ok(Self {
            state_file: state_dir.join("deployment_state.json"),
            policy: UpdatePolicy::default(),
        })
    }

    /// Override the `needs_update` policy.
    pub fn with_policy(mut self, policy: UpdatePolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn load(&self) -> Result<StateMap, DeployError> {
        store::load_or_default(&self.state_file).await
    }

    /// Get the entry for a (host, service) pair.
    pub async fn get(
        &self,
        host: &str,
        service_name: &str,
    ) -> Result<Option<StateEntry>, DeployError> {
        let state = self.load().await?;
        Ok(state
            .get(host)
            .and_then(|services| services.get(service_name))
            .cloned())
    }

    /// Whether (host, service) needs a deployment for `digest`.
    ///
    /// True when no entry exists or the recorded digest differs. Under
    /// `RequireDeployed`, a prior failed attempt also needs an update.
    pub async fn needs_update(
        &self,
        host: &str,
        digest: &str,
        service_name: &str,
    ) -> Result<bool, DeployError> {
        let entry = match self.get(host, service_name).await? {
            Some(entry) => entry,
            None => {
                info!(host, service = service_name, "no previous deployment found");
                return Ok(true);
            }
        };

        if self.policy == UpdatePolicy::RequireDeployed && entry.status != ServiceStatus::Deployed
        {
            info!(host, service = service_name, "previous attempt failed, update needed");
            return Ok(true);
        }

        match entry.descriptor_hash.as_deref() {
            Some(previous) if previous == digest => {
                info!(host, service = service_name, "no changes detected");
                Ok(false)
            }
            Some(previous) => {
                info!(
                    host,
                    service = service_name,
                    old = %&previous[..previous.len().min(8)],
                    new = %&digest[..digest.len().min(8)],
                    "descriptor changed"
                );
                Ok(true)
            }
            None => Ok(true),
        }
    }

    /// Record a successful deployment, overwriting any prior entry.
    pub async fn record_deployment(
        &self,
        host: &str,
        descriptor_path: &str,
        digest: &str,
        service_name: &str,
    ) -> Result<(), DeployError> {
        let _lock = StoreLock::acquire(&self.state_file).await?;
        let mut state = self.load().await?;

        state.entry(host.to_string()).or_default().insert(
            service_name.to_string(),
            StateEntry {
                descriptor_path: Some(descriptor_path.to_string()),
                descriptor_hash: Some(digest.to_string()),
                status: ServiceStatus::Deployed,
                deployed_at: Some(Utc::now()),
                failed_at: None,
                error: None,
            },
        );

        store::save_pretty(&self.state_file, &state).await?;
        info!(host, service = service_name, "recorded deployment");
        Ok(())
    }

    /// Mark a (host, service) as failed.
    ///
    /// Preserves previously recorded descriptor path and digest when the
    /// entry already exists; only status, error, and failed_at change.
    pub async fn mark_failed(
        &self,
        host: &str,
        service_name: &str,
        error_detail: &str,
    ) -> Result<(), DeployError> {
        let _lock = StoreLock::acquire(&self.state_file).await?;
        let mut state = self.load().await?;

        let services = state.entry(host.to_string()).or_default();
        match services.get_mut(service_name) {
            Some(entry) => {
                entry.status = ServiceStatus::Failed;
                entry.error = Some(error_detail.to_string());
                entry.failed_at = Some(Utc::now());
            }
            None => {
                services.insert(
                    service_name.to_string(),
                    StateEntry {
                        descriptor_path: None,
                        descriptor_hash: None,
                        status: ServiceStatus::Failed,
                        deployed_at: None,
                        failed_at: Some(Utc::now()),
                        error: Some(error_detail.to_string()),
                    },
                );
            }
        }

        store::save_pretty(&self.state_file, &state).await?;
        error!(host, service = service_name, "marked deployment as failed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::open(dir.path().join(".slipway")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_record_and_get() {
        let (_dir, store) = temp_store().await;

        store
            .record_deployment("192.168.1.100", "docker-compose.yml", "abc123", "web")
            .await
            .unwrap();

        let entry = store.get("192.168.1.100", "web").await.unwrap().unwrap();
        assert_eq!(entry.descriptor_path.as_deref(), Some("docker-compose.yml"));
        assert_eq!(entry.descriptor_hash.as_deref(), Some("abc123"));
        assert_eq!(entry.status, ServiceStatus::Deployed);
        assert!(entry.deployed_at.is_some());
    }

    #[tokio::test]
    async fn test_get_missing_entry() {
        let (_dir, store) = temp_store().await;
        assert!(store.get("10.0.0.5", "web").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_needs_update_lifecycle() {
        let (_dir, store) = temp_store().await;

        // No prior deployment.
        assert!(store.needs_update("10.0.0.5", "h1", "web").await.unwrap());

        store
            .record_deployment("10.0.0.5", "docker-compose.yml", "h1", "web")
            .await
            .unwrap();

        // Exact digest match short-circuits.
        assert!(!store.needs_update("10.0.0.5", "h1", "web").await.unwrap());

        // Different digest needs update again.
        assert!(store.needs_update("10.0.0.5", "h2", "web").await.unwrap());
    }

    #[tokio::test]
    async fn test_needs_update_is_per_service() {
        let (_dir, store) = temp_store().await;

        store
            .record_deployment("10.0.0.5", "docker-compose.yml", "h1", "web")
            .await
            .unwrap();

        assert!(store.needs_update("10.0.0.5", "h1", "worker").await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_failed_preserves_descriptor_info() {
        let (_dir, store) = temp_store().await;

        store
            .record_deployment("10.0.0.5", "docker-compose.yml", "h1", "web")
            .await
            .unwrap();
        store
            .mark_failed("10.0.0.5", "web", "connection timeout")
            .await
            .unwrap();

        let entry = store.get("10.0.0.5", "web").await.unwrap().unwrap();
        assert_eq!(entry.status, ServiceStatus::Failed);
        assert_eq!(entry.error.as_deref(), Some("connection timeout"));
        assert!(entry.failed_at.is_some());
        // Descriptor context survives the failure overwrite.
        assert_eq!(entry.descriptor_path.as_deref(), Some("docker-compose.yml"));
        assert_eq!(entry.descriptor_hash.as_deref(), Some("h1"));
    }

    #[tokio::test]
    async fn test_mark_failed_creates_entry() {
        let (_dir, store) = temp_store().await;

        store
            .mark_failed("10.0.0.5", "web", "unreachable")
            .await
            .unwrap();

        let entry = store.get("10.0.0.5", "web").await.unwrap().unwrap();
        assert_eq!(entry.status, ServiceStatus::Failed);
        assert!(entry.descriptor_hash.is_none());
    }

    #[tokio::test]
    async fn test_failed_entry_still_matches_by_default() {
        // Reference behavior: a digest match short-circuits even when the
        // last attempt failed.
        let (_dir, store) = temp_store().await;

        store
            .record_deployment("10.0.0.5", "docker-compose.yml", "h1", "web")
            .await
            .unwrap();
        store.mark_failed("10.0.0.5", "web", "boom").await.unwrap();

        assert!(!store.needs_update("10.0.0.5", "h1", "web").await.unwrap());
    }

    #[tokio::test]
    async fn test_require_deployed_policy() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::open(dir.path().to_path_buf())
            .await
            .unwrap()
            .with_policy(UpdatePolicy::RequireDeployed);

        store
            .record_deployment("10.0.0.5", "docker-compose.yml", "h1", "web")
            .await
            .unwrap();
        store.mark_failed("10.0.0.5", "web", "boom").await.unwrap();

        // Same digest, but the failed status forces an update.
        assert!(store.needs_update("10.0.0.5", "h1", "web").await.unwrap());
    }

    #[tokio::test]
    async fn test_persistence_across_instances() {
        let dir = std::env::temp_dir().join(format!("slipway-test-{}", rand::random::<u32>()));

        {
            let store = StateStore::open(dir.clone()).await.unwrap();
            store
                .record_deployment("10.0.0.5", "docker-compose.yml", "h1", "default")
                .await
                .unwrap();
        }

        let store = StateStore::open(dir.clone()).await.unwrap();
        assert!(store.get("10.0.0.5", "default").await.unwrap().is_some());

        let _ = tokio::fs::remove_dir_all(dir).await;
    }

    #[tokio::test]
    async fn test_corrupt_state_file_reads_as_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::open(dir.path().to_path_buf()).await.unwrap();

        tokio::fs::write(dir.path().join("deployment_state.json"), "][garbage")
            .await
            .unwrap();

        assert!(store.get("10.0.0.5", "web").await.unwrap().is_none());
        assert!(store.needs_update("10.0.0.5", "h1", "web").await.unwrap());

        // A write heals the store.
        store
            .record_deployment("10.0.0.5", "docker-compose.yml", "h1", "web")
            .await
            .unwrap();
        assert!(!store.needs_update("10.0.0.5", "h1", "web").await.unwrap());
    }
}
