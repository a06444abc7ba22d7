//! The `deploy` command: run the deployment pipeline against one host.

use anyhow::{bail, Context, Result};
use clap::Args;
use slipway::{
    AnsibleRunner, ConfigStore, DeployError, DeployOutcome, DeployRequest, DeployWorkflow,
    HistoryLog, Profile, SmokeTestSuite, SshShell, StateStore, WorkflowConfig,
};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Target host
    #[arg(long)]
    pub host: Option<String>,

    /// SSH user
    #[arg(long)]
    pub user: Option<String>,

    /// Deployment descriptor (compose file)
    #[arg(long)]
    pub compose_file: Option<PathBuf>,

    /// Service name used for state and history keys
    #[arg(long, default_value = "default")]
    pub service: String,

    /// Deploy even when no change is detected
    #[arg(long)]
    pub force: bool,

    /// Profile supplying defaults for host/user/compose file
    #[arg(long)]
    pub profile: Option<String>,

    /// Environment file handed to the executor
    #[arg(long)]
    pub env_file: Option<String>,

    /// Override the remote deploy command
    #[arg(long)]
    pub deploy_command: Option<String>,

    /// Playbook handed to the executor
    #[arg(long)]
    pub playbook: Option<PathBuf>,

    /// Verify this TCP port after deployment
    #[arg(long)]
    pub health_port: Option<u16>,

    /// Verify this URL returns 200 after deployment
    #[arg(long)]
    pub health_url: Option<String>,

    /// Verify this remote command exits zero after deployment
    #[arg(long)]
    pub health_check: Option<String>,

    /// Skip the production confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Bound on total pipeline wall-clock time, in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

pub async fn run(args: DeployArgs) -> Result<()> {
    let config = ConfigStore::open_default().await?;

    let profile = match &args.profile {
        Some(name) => Some(
            config
                .profile(name)
                .await?
                .with_context(|| format!("unknown profile: {name}"))?,
        ),
        None => None,
    };

    // Explicit flags win over profile defaults.
    let host = args
        .host
        .clone()
        .or_else(|| profile.as_ref().and_then(|p| p.host.clone()))
        .context("no host given; pass --host or a profile that sets one")?;
    let user = args
        .user
        .clone()
        .or_else(|| profile.as_ref().and_then(|p| p.user.clone()));
    let compose_file = args
        .compose_file
        .clone()
        .or_else(|| {
            profile
                .as_ref()
                .and_then(|p| p.descriptor.clone())
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from("docker-compose.yml"));
    let env_file = args
        .env_file
        .clone()
        .or_else(|| profile.as_ref().and_then(|p| p.env_file.clone()));

    if needs_confirmation(profile.as_ref(), args.force, args.yes) {
        confirm_production(&host)?;
    }

    let playbook = match args.playbook.clone() {
        Some(playbook) => playbook,
        None => match config.get("playbook").await? {
            Some(serde_json::Value::String(path)) => PathBuf::from(path),
            _ => PathBuf::from("deploy.yml"),
        },
    };

    let state = StateStore::open_default().await?;
    let history = HistoryLog::open_default().await?;
    let executor = AnsibleRunner::new();
    let shell = SshShell::new();

    let workflow_config = WorkflowConfig {
        playbook,
        force: args.force,
        pipeline_timeout: args.timeout.map(Duration::from_secs),
    };

    let mut workflow =
        DeployWorkflow::new(&executor, &shell, &state, &history, workflow_config);
    if let Some(suite) = build_health_gate(&args, &host, user.as_deref()) {
        workflow = workflow.with_health_gate(suite);
    }

    let mut request = DeployRequest::new(&host, &compose_file).with_service(&args.service);
    if let Some(user) = &user {
        request = request.with_user(user);
    }
    if let Some(env_file) = &env_file {
        request = request.with_env_file(env_file);
    }
    if let Some(command) = &args.deploy_command {
        request = request.with_deploy_command(command);
    }

    match workflow.deploy(request).await {
        Ok(DeployOutcome::Deployed { history_id }) => {
            println!("Deployment succeeded: {history_id}");
            Ok(())
        }
        Ok(DeployOutcome::UpToDate) => {
            println!("No changes detected. Deployment is up to date.");
            println!("Use --force to redeploy anyway.");
            Ok(())
        }
        Err(e @ DeployError::HealthGate(_)) => {
            bail!("{e}\nThe deployment itself succeeded; the service failed verification.")
        }
        Err(e) => Err(e.into()),
    }
}

fn build_health_gate(args: &DeployArgs, host: &str, user: Option<&str>) -> Option<SmokeTestSuite> {
    if args.health_port.is_none() && args.health_url.is_none() && args.health_check.is_none() {
        return None;
    }

    let mut suite = SmokeTestSuite::new(host);
    if let Some(user) = user {
        suite = suite.with_user(user);
    }
    if let Some(port) = args.health_port {
        suite.add_port_check(port);
    }
    if let Some(url) = &args.health_url {
        suite.add_http_check(url, 200);
    }
    if let Some(command) = &args.health_check {
        suite.add_custom_check(command, "custom health check");
    }
    Some(suite)
}

/// A production-tagged profile gates on confirmation unless an explicit
/// force or yes flag was supplied.
fn needs_confirmation(profile: Option<&Profile>, force: bool, yes: bool) -> bool {
    profile.is_some_and(|p| p.is_production()) && !force && !yes
}

fn confirm_production(host: &str) -> Result<()> {
    print!("Profile targets a production environment. Deploy to {host}? [y/N]: ");
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;

    if !matches!(answer.trim(), "y" | "Y" | "yes") {
        println!("Deployment cancelled.");
        bail!("production deploy not confirmed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn production_profile() -> Profile {
        Profile {
            environment: "production".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_production_profile_requires_confirmation() {
        let profile = production_profile();
        assert!(needs_confirmation(Some(&profile), false, false));

        // Force or an explicit yes skips the prompt.
        assert!(!needs_confirmation(Some(&profile), true, false));
        assert!(!needs_confirmation(Some(&profile), false, true));
    }

    #[test]
    fn test_non_production_never_prompts() {
        assert!(!needs_confirmation(Some(&Profile::default()), false, false));
        assert!(!needs_confirmation(None, false, false));
    }
}
