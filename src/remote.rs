//! Remote command transport.
//!
//! Drift checks and custom smoke tests run one-off commands on the
//! target host. The transport is a trait so tests can script outputs;
//! the default implementation shells out to `ssh`.

use crate::error::DeployError;
use crate::types::CommandOutput;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Runs a single command on a remote host.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Execute `command` on `host` as `user`, bounded by `timeout`.
    async fn run(
        &self,
        host: &str,
        user: Option<&str>,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, DeployError>;
}

/// Default transport: the system `ssh` client.
#[derive(Debug, Default)]
pub struct SshShell {
    /// Optional private key passed as `-i`.
    pub identity_file: Option<PathBuf>,
}

impl SshShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity_file(identity_file: PathBuf) -> Self {
        Self {
            identity_file: Some(identity_file),
        }
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn run(
        &self,
        host: &str,
        user: Option<&str>,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, DeployError> {
        let destination = match user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        };

        let mut cmd = tokio::process::Command::new("ssh");
        cmd.arg("-o").arg("StrictHostKeyChecking=no");
        if let Some(identity) = &self.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(&destination).arg(command);

        debug!(host = %destination, command, "running remote command");

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                DeployError::Timeout(format!(
                    "remote command on {} exceeded {}s",
                    destination,
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| DeployError::Transport(format!("failed to spawn ssh: {}", e)))?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedShell;
    use super::*;

    #[tokio::test]
    async fn test_scripted_shell_returns_canned_output() {
        let shell = ScriptedShell::new();
        shell.respond(
            "sha256sum /etc/app.conf",
            CommandOutput {
                exit_code: 0,
                stdout: "abc123  /etc/app.conf\n".to_string(),
                stderr: String::new(),
            },
        );

        let output = shell
            .run(
                "10.0.0.5",
                Some("ubuntu"),
                "sha256sum /etc/app.conf",
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        assert!(output.success());
        assert!(output.stdout.starts_with("abc123"));
    }

    #[tokio::test]
    async fn test_scripted_shell_transport_failure() {
        let shell = ScriptedShell::new();
        shell.fail("uptime", "connection refused");

        let err = shell
            .run("10.0.0.5", None, "uptime", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Transport(_)));
        assert!(err.is_recoverable());
    }
}
