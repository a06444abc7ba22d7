//! Append-only deployment history with rollback-target selection.
//!
//! Every attempt, success or failure, lands in `deployment_history.json`.
//! The log is capped at the 100 most recent entries; eviction of the
//! oldest is a bounded-memory policy, independent of current-state
//! lookups.

use crate::error::DeployError;
use crate::store::{self, StoreLock};
use crate::types::{DeployStatus, HistoryRecord};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Maximum number of records kept after an append.
const MAX_ENTRIES: usize = 100;

/// Process-local sequence to keep IDs unique within one timestamp tick.
static ID_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_id(now: DateTime<Utc>) -> String {
    let seq = ID_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}_{:04}", now.format("%Y%m%d_%H%M%S%3f"), seq % 10_000)
}

/// File-backed append-only history log.
pub struct HistoryLog {
    history_file: PathBuf,
}

impl HistoryLog {
    /// Open a log under the default data dir (`~/.slipway`).
    pub async fn open_default() -> Result<Self, DeployError> {
        Self::open(store::default_data_dir()?).await
    }

    /// Open a log under a custom directory.
    pub async fn open(history_dir: PathBuf) -> Result<Self, DeployError> {
        tokio::fs::create_dir_all(&history_dir)
            .await
            .map_err(|e| DeployError::Storage(format!("failed to create history dir: {}", e)))?;

        Ok(Self {
            history_file: history_dir.join("deployment_history.json"),
        })
    }

    async fn load(&self) -> Result<Vec<HistoryRecord>, DeployError> {
        store::load_or_default(&self.history_file).await
    }

    /// Append a record and return its ID. Truncates to the most recent
    /// 100 entries afterwards.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        host: &str,
        descriptor_path: &str,
        digest: &str,
        source_revision: Option<&str>,
        service_name: &str,
        status: DeployStatus,
        error: Option<&str>,
    ) -> Result<String, DeployError> {
        let _lock = StoreLock::acquire(&self.history_file).await?;
        let mut history = self.load().await?;

        let now = Utc::now();
        let id = next_id(now);

        history.push(HistoryRecord {
            id: id.clone(),
            timestamp: now,
            host: host.to_string(),
            service_name: service_name.to_string(),
            descriptor_path: descriptor_path.to_string(),
            descriptor_hash: digest.to_string(),
            source_revision: source_revision.map(str::to_string),
            status,
            error: error.map(str::to_string),
        });

        if history.len() > MAX_ENTRIES {
            let excess = history.len() - MAX_ENTRIES;
            history.drain(..excess);
        }

        store::save_pretty(&self.history_file, &history).await?;
        info!(id = %id, host, service = service_name, ?status, "recorded deployment in history");

        Ok(id)
    }

    /// List records, most recent first, optionally filtered by host.
    pub async fn list(
        &self,
        host: Option<&str>,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, DeployError> {
        let history = self.load().await?;

        let mut matching: Vec<HistoryRecord> = history
            .into_iter()
            .filter(|r| host.map_or(true, |h| r.host == h))
            .collect();
        matching.reverse();
        matching.truncate(limit);

        Ok(matching)
    }

    /// Get a record by ID.
    pub async fn get(&self, id: &str) -> Result<Option<HistoryRecord>, DeployError> {
        let history = self.load().await?;
        Ok(history.into_iter().find(|r| r.id == id))
    }

    /// The second-most-recent successful record for (host, service),
    /// i.e. the deployment immediately preceding the current one.
    /// `None` when fewer than two successes exist.
    pub async fn previous_successful(
        &self,
        host: &str,
        service_name: &str,
    ) -> Result<Option<HistoryRecord>, DeployError> {
        let history = self.load().await?;

        let successes: Vec<HistoryRecord> = history
            .into_iter()
            .filter(|r| {
                r.host == host && r.service_name == service_name && r.status == DeployStatus::Success
            })
            .collect();

        if successes.len() < 2 {
            return Ok(None);
        }
        Ok(successes.into_iter().rev().nth(1))
    }

    /// Resolve the rollback source of truth: the identified record when
    /// `id` is given, else the previous successful "default" deployment.
    pub async fn rollback_target(
        &self,
        host: &str,
        id: Option<&str>,
    ) -> Result<Option<HistoryRecord>, DeployError> {
        match id {
            Some(id) => self.get(id).await,
            None => self.previous_successful(host, "default").await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_log() -> (tempfile::TempDir, HistoryLog) {
        let dir = tempfile::TempDir::new().unwrap();
        let log = HistoryLog::open(dir.path().to_path_buf()).await.unwrap();
        (dir, log)
    }

    async fn record_success(log: &HistoryLog, host: &str, digest: &str) -> String {
        log.record(
            host,
            "docker-compose.yml",
            digest,
            None,
            "default",
            DeployStatus::Success,
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_record_returns_unique_sortable_ids() {
        let (_dir, log) = temp_log().await;

        let id1 = record_success(&log, "10.0.0.5", "h1").await;
        let id2 = record_success(&log, "10.0.0.5", "h2").await;

        assert_ne!(id1, id2);
        assert!(id1 < id2, "IDs must sort in append order: {id1} vs {id2}");
    }

    #[tokio::test]
    async fn test_list_filters_by_host() {
        let (_dir, log) = temp_log().await;

        record_success(&log, "10.0.0.5", "h1").await;
        record_success(&log, "10.0.0.6", "h2").await;
        record_success(&log, "10.0.0.5", "h3").await;

        let all = log.list(None, 10).await.unwrap();
        assert_eq!(all.len(), 3);

        let host = log.list(Some("10.0.0.5"), 10).await.unwrap();
        assert_eq!(host.len(), 2);

        // Most recent first.
        assert_eq!(host[0].descriptor_hash, "h3");
        assert_eq!(host[1].descriptor_hash, "h1");
    }

    #[tokio::test]
    async fn test_list_respects_limit() {
        let (_dir, log) = temp_log().await;

        for i in 0..5 {
            record_success(&log, "10.0.0.5", &format!("h{i}")).await;
        }

        let listed = log.list(None, 2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].descriptor_hash, "h4");
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let (_dir, log) = temp_log().await;

        let id = log
            .record(
                "10.0.0.5",
                "docker-compose.yml",
                "abc123",
                Some("deadbeef"),
                "web",
                DeployStatus::Failed,
                Some("executor reported failed"),
            )
            .await
            .unwrap();

        let record = log.get(&id).await.unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.host, "10.0.0.5");
        assert_eq!(record.source_revision.as_deref(), Some("deadbeef"));
        assert_eq!(record.status, DeployStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("executor reported failed"));

        assert!(log.get("20000101_000000000_0000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_log_is_capped_at_100() {
        let (_dir, log) = temp_log().await;

        let first = record_success(&log, "10.0.0.5", "h0").await;
        for i in 1..=100 {
            record_success(&log, "10.0.0.5", &format!("h{i}")).await;
        }

        let all = log.list(None, 1000).await.unwrap();
        assert_eq!(all.len(), 100);

        // The oldest entry was evicted.
        assert!(log.get(&first).await.unwrap().is_none());
        assert_eq!(all.last().unwrap().descriptor_hash, "h1");
        assert_eq!(all[0].descriptor_hash, "h100");
    }

    #[tokio::test]
    async fn test_previous_successful_needs_two_successes() {
        let (_dir, log) = temp_log().await;

        assert!(log
            .previous_successful("10.0.0.5", "default")
            .await
            .unwrap()
            .is_none());

        record_success(&log, "10.0.0.5", "h1").await;
        assert!(log
            .previous_successful("10.0.0.5", "default")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_previous_successful_skips_failures() {
        let (_dir, log) = temp_log().await;

        let id1 = record_success(&log, "10.0.0.5", "h1").await;
        log.record(
            "10.0.0.5",
            "docker-compose.yml",
            "h2",
            None,
            "default",
            DeployStatus::Failed,
            Some("boom"),
        )
        .await
        .unwrap();
        record_success(&log, "10.0.0.5", "h3").await;

        // h3 is current; the failed h2 does not count; previous is h1.
        let previous = log
            .previous_successful("10.0.0.5", "default")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(previous.id, id1);
    }

    #[tokio::test]
    async fn test_previous_successful_scoped_to_host_and_service() {
        let (_dir, log) = temp_log().await;

        record_success(&log, "10.0.0.5", "h1").await;
        record_success(&log, "10.0.0.6", "h2").await;
        record_success(&log, "10.0.0.6", "h3").await;

        // Only one success on 10.0.0.5.
        assert!(log
            .previous_successful("10.0.0.5", "default")
            .await
            .unwrap()
            .is_none());

        let previous = log
            .previous_successful("10.0.0.6", "default")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(previous.descriptor_hash, "h2");
    }

    #[tokio::test]
    async fn test_rollback_target() {
        let (_dir, log) = temp_log().await;

        let id1 = record_success(&log, "10.0.0.5", "h1").await;
        record_success(&log, "10.0.0.5", "h2").await;

        // Without an explicit ID: previous successful default deployment.
        let target = log.rollback_target("10.0.0.5", None).await.unwrap().unwrap();
        assert_eq!(target.id, id1);

        // With an explicit ID: exactly that record.
        let target = log
            .rollback_target("10.0.0.5", Some(&id1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(target.id, id1);

        assert!(log
            .rollback_target("10.0.0.5", Some("no_such_id"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_corrupt_history_reads_as_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = HistoryLog::open(dir.path().to_path_buf()).await.unwrap();

        tokio::fs::write(dir.path().join("deployment_history.json"), "not json")
            .await
            .unwrap();

        assert!(log.list(None, 10).await.unwrap().is_empty());
        record_success(&log, "10.0.0.5", "h1").await;
        assert_eq!(log.list(None, 10).await.unwrap().len(), 1);
    }
}
