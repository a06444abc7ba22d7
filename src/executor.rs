//! External executor boundary.
//!
//! The remote configuration run itself is a black box: it gets a
//! playbook path, a target descriptor file, and key-value extra vars,
//! and reports a terminal status string plus captured output. The
//! orchestrator only interprets that report; it never looks inside the
//! playbook.

use crate::error::DeployError;
use crate::types::ExecutorReport;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Contract for the external configuration-management run.
#[async_trait]
pub trait PlaybookExecutor: Send + Sync {
    /// Run `playbook` against the hosts described by `inventory` with
    /// the given extra variables. An `Err` means the run could not be
    /// started or observed; a report with a non-`successful` status
    /// means it ran and failed.
    async fn run(
        &self,
        playbook: &Path,
        inventory: &Path,
        extra_vars: &BTreeMap<String, String>,
    ) -> Result<ExecutorReport, DeployError>;
}

/// Default executor: the `ansible-playbook` CLI.
#[derive(Debug, Default)]
pub struct AnsibleRunner;

impl AnsibleRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PlaybookExecutor for AnsibleRunner {
    async fn run(
        &self,
        playbook: &Path,
        inventory: &Path,
        extra_vars: &BTreeMap<String, String>,
    ) -> Result<ExecutorReport, DeployError> {
        let mut cmd = tokio::process::Command::new("ansible-playbook");
        cmd.arg("-i").arg(inventory).arg(playbook);
        for (key, value) in extra_vars {
            cmd.arg("-e").arg(format!("{key}={value}"));
        }

        info!(playbook = %playbook.display(), inventory = %inventory.display(), "running playbook");
        debug!(?extra_vars, "executor extra vars");

        let output = cmd
            .output()
            .await
            .map_err(|e| DeployError::Executor(format!("failed to spawn ansible-playbook: {}", e)))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        let status = if output.status.success() {
            "successful"
        } else {
            "failed"
        };

        Ok(ExecutorReport {
            status: status.to_string(),
            output: combined,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedExecutor;
    use super::*;

    #[tokio::test]
    async fn test_scripted_executor_counts_calls() {
        let executor = ScriptedExecutor::succeeding();
        let vars = BTreeMap::new();

        let report = executor
            .run(Path::new("deploy.yml"), Path::new("inventory.yml"), &vars)
            .await
            .unwrap();

        assert!(report.is_successful());
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_executor_failure_report() {
        let executor = ScriptedExecutor::failing();
        let vars = BTreeMap::new();

        let report = executor
            .run(Path::new("deploy.yml"), Path::new("inventory.yml"), &vars)
            .await
            .unwrap();

        assert!(!report.is_successful());
    }
}
