//! Domain types for the deployment pipeline.
//!
//! These are the types the workflow and stores need. Nothing more.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal status of a deployment attempt, as recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployStatus {
    Success,
    Failed,
}

/// Status of the current-state entry for a (host, service) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Deployed,
    Failed,
}

/// One append-only history record. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Sortable, timestamp-derived identifier.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub service_name: String,
    pub descriptor_path: String,
    pub descriptor_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_revision: Option<String>,
    pub status: DeployStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Current-state entry for a (host, service) pair. Last write wins.
///
/// `mark_failed` on an entry that already carries descriptor info keeps
/// that info; only status, error, and failed_at are overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor_hash: Option<String>,
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How a baselined remote file diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftStatus {
    Modified,
    Deleted,
}

/// One divergence between a recorded baseline and the live remote file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftEntry {
    pub file: String,
    pub expected: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    pub status: DriftStatus,
}

/// Terminal report from the external executor.
#[derive(Debug, Clone)]
pub struct ExecutorReport {
    /// Terminal status string. Only `"successful"` counts as success;
    /// anything else, including partial or unknown, is failure.
    pub status: String,
    /// Captured output, surfaced as error detail on failure.
    pub output: String,
}

impl ExecutorReport {
    pub fn is_successful(&self) -> bool {
        self.status == "successful"
    }
}

/// Captured result of a remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
