//! Deployment workflow engine.
//!
//! The state machine that drives one deployment request. It consults
//! the state store for change detection, builds the target descriptor,
//! hands off to the external executor, interprets the report, records
//! the outcome, and optionally runs the health gate. Each step does one
//! thing and transitions.

use crate::error::DeployError;
use crate::executor::PlaybookExecutor;
use crate::hash;
use crate::health::SmokeTestSuite;
use crate::history::HistoryLog;
use crate::remote::RemoteShell;
use crate::state::{StateStore, DEFAULT_SERVICE};
use crate::target::{Auth, TargetDescriptor, TransientInventory};
use crate::types::{DeployStatus, ExecutorReport};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Workflow configuration.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Playbook handed to the external executor.
    pub playbook: PathBuf,
    /// Deploy even when no change is detected.
    pub force: bool,
    /// Wall-clock bound for the whole pipeline, including the health
    /// gate. None means unbounded.
    pub pipeline_timeout: Option<Duration>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            playbook: PathBuf::from("deploy.yml"),
            force: false,
            pipeline_timeout: None,
        }
    }
}

/// One deployment request.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub host: String,
    pub user: Option<String>,
    pub auth: Option<Auth>,
    pub descriptor_path: PathBuf,
    pub service_name: String,
    pub env_file: Option<String>,
    pub deploy_command: Option<String>,
    pub extra_vars: BTreeMap<String, String>,
}

impl DeployRequest {
    pub fn new(host: impl Into<String>, descriptor_path: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            user: None,
            auth: None,
            descriptor_path: descriptor_path.into(),
            service_name: DEFAULT_SERVICE.to_string(),
            env_file: None,
            deploy_command: None,
            extra_vars: BTreeMap::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_service(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn with_env_file(mut self, env_file: impl Into<String>) -> Self {
        self.env_file = Some(env_file.into());
        self
    }

    pub fn with_deploy_command(mut self, command: impl Into<String>) -> Self {
        self.deploy_command = Some(command.into());
        self
    }
}

/// Workflow steps, the state machine's nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Digest the descriptor and decide whether to proceed.
    ChangeCheck,
    /// Build and write the target descriptor.
    Prepare,
    /// Hand off to the external executor.
    Execute,
    /// Interpret the report and persist state + history.
    Record,
    /// Run the smoke-test suite.
    HealthCheck,
    /// No change detected; nothing was done.
    Skipped,
    /// Done.
    Complete,
    /// Failed, already recorded.
    Failed { reason: String },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::ChangeCheck => "change_check",
            Step::Prepare => "prepare",
            Step::Execute => "execute",
            Step::Record => "record",
            Step::HealthCheck => "health_check",
            Step::Skipped => "skipped",
            Step::Complete => "complete",
            Step::Failed { .. } => "failed",
        }
    }
}

/// Result of advancing one step.
#[derive(Debug)]
pub enum StepResult {
    /// Keep going, call advance() again.
    Continue,
    /// No change detected; terminal, no side effects.
    Skipped,
    /// Done successfully.
    Complete,
    /// Failed; outcome was recorded before surfacing.
    Failed(DeployError),
}

/// Final outcome of a completed pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    /// Descriptor digest matched the recorded state; nothing was done.
    UpToDate,
    /// Deployed and recorded (and, if requested, verified healthy).
    Deployed { history_id: String },
}

/// Deployment lifecycle event, dispatched to registered listeners.
///
/// `Started` fires before the executor hand-off; exactly one of
/// `Succeeded`/`Failed` fires per run that got past the change check.
#[derive(Debug, Clone)]
pub enum DeployEvent {
    Started {
        host: String,
        service: String,
    },
    Succeeded {
        host: String,
        service: String,
        history_id: String,
    },
    Failed {
        host: String,
        service: String,
        error: String,
    },
}

/// Receives deployment lifecycle events in dispatch order.
pub trait DeployListener: Send + Sync {
    fn on_event(&self, event: &DeployEvent);
}

/// Mutable snapshot of one deployment run.
pub struct DeployRun {
    pub request: DeployRequest,
    pub step: Step,
    pub digest: Option<String>,
    pub history_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    inventory: Option<TransientInventory>,
    report: Option<ExecutorReport>,
}

impl DeployRun {
    pub fn new(request: DeployRequest) -> Self {
        let now = Utc::now();
        Self {
            request,
            step: Step::ChangeCheck,
            digest: None,
            history_id: None,
            created_at: now,
            updated_at: now,
            inventory: None,
            report: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.step,
            Step::Skipped | Step::Complete | Step::Failed { .. }
        )
    }

    fn transition(&mut self, step: Step) {
        info!(from = self.step.name(), to = step.name(), "workflow transition");
        self.step = step;
        self.updated_at = Utc::now();
    }
}

/// The deployment workflow engine.
///
/// Collaborators are injected at construction; there are no globals.
pub struct DeployWorkflow<'a, E: PlaybookExecutor, S: RemoteShell> {
    executor: &'a E,
    shell: &'a S,
    state: &'a StateStore,
    history: &'a HistoryLog,
    config: WorkflowConfig,
    health: Option<SmokeTestSuite>,
    listeners: Vec<Box<dyn DeployListener>>,
}

impl<'a, E: PlaybookExecutor, S: RemoteShell> DeployWorkflow<'a, E, S> {
    pub fn new(
        executor: &'a E,
        shell: &'a S,
        state: &'a StateStore,
        history: &'a HistoryLog,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            executor,
            shell,
            state,
            history,
            config,
            health: None,
            listeners: Vec::new(),
        }
    }

    /// Attach a smoke-test suite to run after a successful deployment.
    pub fn with_health_gate(mut self, suite: SmokeTestSuite) -> Self {
        self.health = Some(suite);
        self
    }

    /// Register a lifecycle event listener. Dispatch order is
    /// registration order.
    pub fn add_listener(&mut self, listener: Box<dyn DeployListener>) {
        self.listeners.push(listener);
    }

    fn emit(&self, event: DeployEvent) {
        for listener in &self.listeners {
            listener.on_event(&event);
        }
    }

    /// Run a request to completion, honoring the pipeline timeout.
    pub async fn deploy(&self, request: DeployRequest) -> Result<DeployOutcome, DeployError> {
        let mut run = DeployRun::new(request);

        let result = match self.config.pipeline_timeout {
            Some(budget) => {
                match tokio::time::timeout(budget, self.run_to_completion(&mut run)).await {
                    Ok(result) => result,
                    Err(_) => {
                        let reason = format!("pipeline exceeded {}s", budget.as_secs());
                        // Best-effort recording; the deadline already passed.
                        if let Err(e) = self
                            .state
                            .mark_failed(&run.request.host, &run.request.service_name, &reason)
                            .await
                        {
                            warn!(error = %e, "failed to record pipeline timeout");
                        }
                        self.emit(DeployEvent::Failed {
                            host: run.request.host.clone(),
                            service: run.request.service_name.clone(),
                            error: reason.clone(),
                        });
                        return Err(DeployError::Timeout(reason));
                    }
                }
            }
            None => self.run_to_completion(&mut run).await,
        };

        match result? {
            StepResult::Skipped => Ok(DeployOutcome::UpToDate),
            StepResult::Complete => Ok(DeployOutcome::Deployed {
                history_id: run
                    .history_id
                    .clone()
                    .ok_or_else(|| DeployError::InvalidState("history id missing".into()))?,
            }),
            StepResult::Failed(error) => Err(error),
            StepResult::Continue => Err(DeployError::InvalidState(
                "run_to_completion returned Continue".into(),
            )),
        }
    }

    /// Run until a terminal step result.
    pub async fn run_to_completion(&self, run: &mut DeployRun) -> Result<StepResult, DeployError> {
        loop {
            match self.advance(run).await? {
                StepResult::Continue => continue,
                other => return Ok(other),
            }
        }
    }

    /// Advance the workflow by one step.
    pub async fn advance(&self, run: &mut DeployRun) -> Result<StepResult, DeployError> {
        match &run.step {
            Step::ChangeCheck => self.step_change_check(run).await,
            Step::Prepare => self.step_prepare(run).await,
            Step::Execute => self.step_execute(run).await,
            Step::Record => self.step_record(run).await,
            Step::HealthCheck => self.step_health_check(run).await,
            Step::Skipped => Ok(StepResult::Skipped),
            Step::Complete => Ok(StepResult::Complete),
            Step::Failed { reason } => {
                Ok(StepResult::Failed(DeployError::Executor(reason.clone())))
            }
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Step implementations
    // ───────────────────────────────────────────────────────────────

    async fn step_change_check(&self, run: &mut DeployRun) -> Result<StepResult, DeployError> {
        let digest = hash::digest_file(&run.request.descriptor_path).await;

        if !self.config.force
            && !self
                .state
                .needs_update(&run.request.host, &digest, &run.request.service_name)
                .await?
        {
            info!(
                host = %run.request.host,
                service = %run.request.service_name,
                "deployment is up to date"
            );
            run.digest = Some(digest);
            run.transition(Step::Skipped);
            return Ok(StepResult::Skipped);
        }

        run.digest = Some(digest);
        run.transition(Step::Prepare);
        Ok(StepResult::Continue)
    }

    async fn step_prepare(&self, run: &mut DeployRun) -> Result<StepResult, DeployError> {
        let mut target = TargetDescriptor::new(&run.request.host);
        if let Some(user) = &run.request.user {
            target = target.with_user(user);
        }
        if let Some(auth) = &run.request.auth {
            target = target.with_auth(auth.clone());
        }

        run.inventory = Some(target.write_transient().await?);
        run.transition(Step::Execute);
        Ok(StepResult::Continue)
    }

    async fn step_execute(&self, run: &mut DeployRun) -> Result<StepResult, DeployError> {
        let inventory = run.inventory.as_ref().ok_or_else(|| {
            DeployError::InvalidState("inventory missing at Execute".into())
        })?;

        self.emit(DeployEvent::Started {
            host: run.request.host.clone(),
            service: run.request.service_name.clone(),
        });

        let mut extra_vars = run.request.extra_vars.clone();
        extra_vars.insert(
            "DOCKER_COMPOSE_FILE_PATH".to_string(),
            run.request.descriptor_path.display().to_string(),
        );
        if let Some(env_file) = &run.request.env_file {
            extra_vars.insert("ENV_FILE_PATH".to_string(), env_file.clone());
        }
        if let Some(command) = &run.request.deploy_command {
            extra_vars.insert("DEPLOY_COMMAND".to_string(), command.clone());
        }

        // A spawn/observe failure is interpreted like a failed report so
        // the Record step still runs; recording is never skipped on the
        // error path.
        let report = match self
            .executor
            .run(&self.config.playbook, inventory.path(), &extra_vars)
            .await
        {
            Ok(report) => report,
            Err(e) => ExecutorReport {
                status: "error".to_string(),
                output: e.to_string(),
            },
        };

        run.report = Some(report);
        run.transition(Step::Record);
        Ok(StepResult::Continue)
    }

    async fn step_record(&self, run: &mut DeployRun) -> Result<StepResult, DeployError> {
        let report = run
            .report
            .as_ref()
            .ok_or_else(|| DeployError::InvalidState("report missing at Record".into()))?;
        let digest = run
            .digest
            .clone()
            .ok_or_else(|| DeployError::InvalidState("digest missing at Record".into()))?;
        let descriptor = run.request.descriptor_path.display().to_string();

        if report.is_successful() {
            self.state
                .record_deployment(
                    &run.request.host,
                    &descriptor,
                    &digest,
                    &run.request.service_name,
                )
                .await?;

            // Best-effort metadata; failure to resolve never aborts recording.
            let revision = source_revision().await;
            let history_id = self
                .history
                .record(
                    &run.request.host,
                    &descriptor,
                    &digest,
                    revision.as_deref(),
                    &run.request.service_name,
                    DeployStatus::Success,
                    None,
                )
                .await?;

            run.history_id = Some(history_id);
            run.transition(Step::HealthCheck);
            return Ok(StepResult::Continue);
        }

        let reason = if report.output.trim().is_empty() {
            format!("deployment failed with status: {}", report.status)
        } else {
            format!(
                "deployment failed with status {}: {}",
                report.status,
                report.output.trim()
            )
        };

        self.state
            .mark_failed(&run.request.host, &run.request.service_name, &reason)
            .await?;
        self.history
            .record(
                &run.request.host,
                &descriptor,
                &digest,
                None,
                &run.request.service_name,
                DeployStatus::Failed,
                Some(&reason),
            )
            .await?;

        self.emit(DeployEvent::Failed {
            host: run.request.host.clone(),
            service: run.request.service_name.clone(),
            error: reason.clone(),
        });

        run.transition(Step::Failed {
            reason: reason.clone(),
        });
        Ok(StepResult::Failed(DeployError::Executor(reason)))
    }

    async fn step_health_check(&self, run: &mut DeployRun) -> Result<StepResult, DeployError> {
        let Some(suite) = &self.health else {
            self.finish(run);
            return Ok(StepResult::Complete);
        };

        if suite.run_all(self.shell).await {
            self.finish(run);
            return Ok(StepResult::Complete);
        }

        // Deployed but not verified healthy: a failure class of its own.
        // The deployment itself was already recorded as a success; the
        // gate failure is recorded on top of it.
        let reason = "deployment succeeded but smoke tests failed".to_string();
        let digest = run.digest.clone().unwrap_or_default();

        self.state
            .mark_failed(&run.request.host, &run.request.service_name, &reason)
            .await?;
        self.history
            .record(
                &run.request.host,
                &run.request.descriptor_path.display().to_string(),
                &digest,
                None,
                &run.request.service_name,
                DeployStatus::Failed,
                Some(&reason),
            )
            .await?;

        self.emit(DeployEvent::Failed {
            host: run.request.host.clone(),
            service: run.request.service_name.clone(),
            error: reason.clone(),
        });

        run.transition(Step::Failed {
            reason: reason.clone(),
        });
        Ok(StepResult::Failed(DeployError::HealthGate(reason)))
    }

    fn finish(&self, run: &mut DeployRun) {
        self.emit(DeployEvent::Succeeded {
            host: run.request.host.clone(),
            service: run.request.service_name.clone(),
            history_id: run.history_id.clone().unwrap_or_default(),
        });
        run.transition(Step::Complete);
    }
}

/// Current VCS revision, if the working directory is a checkout.
async fn source_revision() -> Option<String> {
    let mut cmd = tokio::process::Command::new("git");
    cmd.arg("rev-parse").arg("HEAD");

    let output = tokio::time::timeout(Duration::from_secs(5), cmd.output())
        .await
        .ok()?
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let revision = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!revision.is_empty()).then_some(revision)
}
