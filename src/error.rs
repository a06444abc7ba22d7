//! Error types for the deployment pipeline.
//!
//! No `anyhow` leakage. Explicit, typed errors.

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("executor run failed: {0}")]
    Executor(String),

    #[error("health gate failed: {0}")]
    HealthGate(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("remote transport failed: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid workflow state: {0}")]
    InvalidState(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl DeployError {
    /// Whether this error might be recoverable by retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DeployError::Transport(_) | DeployError::Timeout(_) | DeployError::Executor(_)
        )
    }
}
