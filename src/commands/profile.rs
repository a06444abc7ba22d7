//! The `profile` command: manage deployment profiles.

use anyhow::{Context, Result};
use clap::Subcommand;
use slipway::{ConfigStore, Profile};

#[derive(Subcommand, Debug)]
pub enum ProfileAction {
    /// Create or replace a profile
    Create {
        name: String,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        user: Option<String>,

        /// Deployment descriptor (compose file) path
        #[arg(long)]
        compose_file: Option<String>,

        #[arg(long)]
        env_file: Option<String>,

        /// Environment tag; "production" gates deploys on confirmation
        #[arg(long, default_value = "development")]
        environment: String,
    },

    /// List all profiles
    List,

    /// Show one profile
    Show { name: String },

    /// Delete a profile
    Delete { name: String },
}

pub async fn run(action: ProfileAction) -> Result<()> {
    let config = ConfigStore::open_default().await?;

    match action {
        ProfileAction::Create {
            name,
            host,
            user,
            compose_file,
            env_file,
            environment,
        } => {
            let profile = Profile {
                host,
                user,
                descriptor: compose_file,
                env_file,
                environment,
            };
            config.save_profile(&name, &profile).await?;
            println!("Saved profile {name} ({})", profile.environment);
        }

        ProfileAction::List => {
            let profiles = config.list_profiles().await?;
            if profiles.is_empty() {
                println!("No profiles.");
                return Ok(());
            }
            for (name, profile) in profiles {
                println!(
                    "{name}  {}  {}",
                    profile.environment,
                    profile.host.as_deref().unwrap_or("-"),
                );
            }
        }

        ProfileAction::Show { name } => {
            let profile = config
                .profile(&name)
                .await?
                .with_context(|| format!("unknown profile: {name}"))?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }

        ProfileAction::Delete { name } => {
            config.delete_profile(&name).await?;
            println!("Deleted profile {name} (if it existed).");
        }
    }

    Ok(())
}
