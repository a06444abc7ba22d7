mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Slipway - idempotent deployment of containerized services to a single host
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy a compose descriptor to a host
    Deploy(commands::deploy::DeployArgs),

    /// Show deployment history
    History {
        /// Only show records for this host
        #[arg(long)]
        host: Option<String>,

        /// Maximum number of records to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Redeploy a previous successful deployment
    Rollback(commands::rollback::RollbackArgs),

    /// Compare recorded file baselines against the live host
    DriftCheck {
        /// Target host
        #[arg(long)]
        host: String,

        /// SSH user
        #[arg(long)]
        user: Option<String>,
    },

    /// Manage deployment profiles
    Profile {
        #[command(subcommand)]
        action: commands::profile::ProfileAction,
    },
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Deploy(args) => commands::deploy::run(args).await,
        Commands::History { host, limit } => {
            commands::history::run(host.as_deref(), limit).await
        }
        Commands::Rollback(args) => commands::rollback::run(args).await,
        Commands::DriftCheck { host, user } => {
            commands::drift::run(&host, user.as_deref()).await
        }
        Commands::Profile { action } => commands::profile::run(action).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
