//! The `rollback` command: redeploy a previous successful deployment.
//!
//! The rollback target is either an explicit history record or the one
//! immediately preceding the current deployment. The target's recorded
//! descriptor is force-deployed through the normal pipeline, so the
//! rollback itself lands in state and history like any other attempt.

use anyhow::{bail, Context, Result};
use clap::Args;
use slipway::{
    AnsibleRunner, ConfigStore, DeployOutcome, DeployRequest, DeployWorkflow, HistoryLog,
    SshShell, StateStore, WorkflowConfig,
};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct RollbackArgs {
    /// Target host
    #[arg(long)]
    pub host: String,

    /// Roll back to this history record instead of the previous success
    #[arg(long)]
    pub to: Option<String>,

    /// SSH user
    #[arg(long)]
    pub user: Option<String>,

    /// Playbook handed to the executor
    #[arg(long)]
    pub playbook: Option<PathBuf>,
}

pub async fn run(args: RollbackArgs) -> Result<()> {
    let history = HistoryLog::open_default().await?;

    let target = history
        .rollback_target(&args.host, args.to.as_deref())
        .await?
        .with_context(|| match &args.to {
            Some(id) => format!("no history record with id {id}"),
            None => format!("no previous successful deployment for {}", args.host),
        })?;

    let descriptor = PathBuf::from(&target.descriptor_path);
    if !descriptor.exists() {
        bail!(
            "descriptor {} from record {} no longer exists",
            target.descriptor_path,
            target.id
        );
    }

    let digest = &target.descriptor_hash[..target.descriptor_hash.len().min(8)];
    println!(
        "Rolling back {} to {} ({}, {})",
        args.host, target.id, digest, target.timestamp
    );

    let config = ConfigStore::open_default().await?;
    let playbook = match args.playbook {
        Some(playbook) => playbook,
        None => match config.get("playbook").await? {
            Some(serde_json::Value::String(path)) => PathBuf::from(path),
            _ => PathBuf::from("deploy.yml"),
        },
    };

    let state = StateStore::open_default().await?;
    let executor = AnsibleRunner::new();
    let shell = SshShell::new();

    // Rollback always redeploys, even when the digest still matches.
    let workflow = DeployWorkflow::new(
        &executor,
        &shell,
        &state,
        &history,
        WorkflowConfig {
            playbook,
            force: true,
            pipeline_timeout: None,
        },
    );

    let mut request =
        DeployRequest::new(&args.host, descriptor).with_service(&target.service_name);
    if let Some(user) = &args.user {
        request = request.with_user(user);
    }

    match workflow.deploy(request).await? {
        DeployOutcome::Deployed { history_id } => {
            println!("Rollback succeeded: {history_id}");
        }
        DeployOutcome::UpToDate => {
            // Unreachable with force set; report it anyway.
            println!("Nothing to do; deployment already matches the target.");
        }
    }

    Ok(())
}
