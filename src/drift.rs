//! Drift detection against a recorded baseline.
//!
//! Baselines are recorded by an operator action, not by deployment.
//! A check compares each baselined file's expected hash against the
//! hash fetched from the live host; out-of-band edits show up as
//! `Modified`, unreachable or missing files as `Deleted`.

use crate::error::DeployError;
use crate::remote::RemoteShell;
use crate::store::{self, StoreLock};
use crate::types::{DriftEntry, DriftStatus};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Timeout for a single remote hash fetch.
const REMOTE_HASH_TIMEOUT: Duration = Duration::from_secs(10);

type BaselineMap = BTreeMap<String, BTreeMap<String, String>>;

/// File-backed drift baseline store and checker.
pub struct DriftDetector {
    drift_file: PathBuf,
}

impl DriftDetector {
    /// Open under the default data dir (`~/.slipway`).
    pub async fn open_default() -> Result<Self, DeployError> {
        Self::open(store::default_data_dir()?).await
    }

    /// Open under a custom directory.
    pub async fn open(state_dir: PathBuf) -> Result<Self, DeployError> {
        tokio::fs::create_dir_all(&state_dir)
            .await
            .map_err(|e| DeployError::Storage(format!("failed to create drift dir: {}", e)))?;

        Ok(Self {
            drift_file: state_dir.join("drift_state.json"),
        })
    }

    /// Upsert one baseline entry: the expected hash of `file_path` on `host`.
    pub async fn record_baseline(
        &self,
        host: &str,
        file_path: &str,
        expected_hash: &str,
    ) -> Result<(), DeployError> {
        let _lock = StoreLock::acquire(&self.drift_file).await?;
        let mut state: BaselineMap = store::load_or_default(&self.drift_file).await?;

        state
            .entry(host.to_string())
            .or_default()
            .insert(file_path.to_string(), expected_hash.to_string());

        store::save_pretty(&self.drift_file, &state).await?;
        info!(host, file = file_path, "recorded drift baseline");
        Ok(())
    }

    /// The recorded baseline for a host (file path → expected hash).
    pub async fn baseline(&self, host: &str) -> Result<BTreeMap<String, String>, DeployError> {
        let state: BaselineMap = store::load_or_default(&self.drift_file).await?;
        Ok(state.get(host).cloned().unwrap_or_default())
    }

    /// Compare every baselined file on `host` against its live hash.
    ///
    /// A fetch failure degrades that one file to `Deleted`; it never
    /// aborts the scan of the remaining files. No baseline for the host
    /// is an empty report, not an error.
    pub async fn check(
        &self,
        host: &str,
        user: Option<&str>,
        shell: &dyn RemoteShell,
    ) -> Result<Vec<DriftEntry>, DeployError> {
        let baseline = self.baseline(host).await?;
        if baseline.is_empty() {
            info!(host, "no drift baseline recorded");
            return Ok(Vec::new());
        }

        let mut drifts = Vec::new();
        for (file_path, expected) in baseline {
            match remote_file_hash(shell, host, user, &file_path).await {
                Some(actual) if actual != expected => {
                    drifts.push(DriftEntry {
                        file: file_path,
                        expected,
                        actual: Some(actual),
                        status: DriftStatus::Modified,
                    });
                }
                Some(_) => {}
                None => {
                    drifts.push(DriftEntry {
                        file: file_path,
                        expected,
                        actual: None,
                        status: DriftStatus::Deleted,
                    });
                }
            }
        }

        Ok(drifts)
    }
}

/// Fetch the hash of one remote file. `None` when the file is missing
/// or the transport fails.
async fn remote_file_hash(
    shell: &dyn RemoteShell,
    host: &str,
    user: Option<&str>,
    file_path: &str,
) -> Option<String> {
    let command = format!("sha256sum {file_path}");
    match shell.run(host, user, &command, REMOTE_HASH_TIMEOUT).await {
        Ok(output) if output.success() => {
            // sha256sum output: "hash  filename"
            output.stdout.split_whitespace().next().map(str::to_string)
        }
        Ok(output) => {
            warn!(host, file = file_path, exit = output.exit_code, "remote hash command failed");
            None
        }
        Err(e) => {
            warn!(host, file = file_path, error = %e, "failed to fetch remote file hash");
            None
        }
    }
}
