//! Slipway Deployment Library
//!
//! Idempotent deployment of containerized services to a single target
//! host, with rollback targets and post-deploy verification.
//!
//! # Design
//!
//! The workflow engine is pure pipeline logic. Change detection runs
//! against a file-backed state store keyed by (host, service); every
//! attempt lands in a capped append-only history log; execution is
//! delegated to an external configuration run behind the
//! [`PlaybookExecutor`] trait; one-off remote commands (drift checks,
//! custom smoke tests) go through [`RemoteShell`]. Implement either
//! trait to swap in your own infrastructure.
//!
//! # Usage
//!
//! ```ignore
//! use slipway::{
//!     AnsibleRunner, DeployRequest, DeployWorkflow, HistoryLog, SshShell,
//!     StateStore, WorkflowConfig,
//! };
//!
//! # async fn example() -> Result<(), slipway::DeployError> {
//! let state = StateStore::open_default().await?;
//! let history = HistoryLog::open_default().await?;
//! let executor = AnsibleRunner::new();
//! let shell = SshShell::new();
//!
//! let workflow = DeployWorkflow::new(
//!     &executor, &shell, &state, &history, WorkflowConfig::default(),
//! );
//!
//! let request = DeployRequest::new("10.0.0.5", "docker-compose.yml")
//!     .with_user("ubuntu");
//!
//! match workflow.deploy(request).await? {
//!     slipway::DeployOutcome::Deployed { history_id } => {
//!         println!("deployed: {history_id}");
//!     }
//!     slipway::DeployOutcome::UpToDate => {
//!         println!("no changes detected");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod drift;
pub mod error;
pub mod executor;
pub mod hash;
pub mod health;
pub mod history;
pub mod remote;
pub mod state;
pub mod store;
pub mod target;
pub mod types;
pub mod workflow;

// Re-export the main types at crate root for convenience
pub use config::{ConfigStore, Profile};
pub use drift::DriftDetector;
pub use error::DeployError;
pub use executor::{AnsibleRunner, PlaybookExecutor};
pub use health::{HealthCheck, SmokeTest, SmokeTestSuite};
pub use history::HistoryLog;
pub use remote::{RemoteShell, SshShell};
pub use state::{StateStore, UpdatePolicy, DEFAULT_SERVICE};
pub use target::{Auth, TargetDescriptor, TransientInventory};
pub use types::*;
pub use workflow::{
    DeployEvent, DeployListener, DeployOutcome, DeployRequest, DeployRun, DeployWorkflow, Step,
    StepResult, WorkflowConfig,
};
