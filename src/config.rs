//! Tool configuration and deployment profiles.
//!
//! Two files under the data dir: `config.json` holds flat key-value
//! settings, `profiles.json` holds named deployment profiles. Profile
//! values are defaults; explicit flags always win when merging.

use crate::error::DeployError;
use crate::store::{self, StoreLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn};

fn default_environment() -> String {
    "development".to_string()
}

/// A named set of deployment defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Deployment descriptor (compose file) path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_file: Option<String>,
    /// Environment tag; `"production"` gates on confirmation.
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            host: None,
            user: None,
            descriptor: None,
            env_file: None,
            environment: default_environment(),
        }
    }
}

impl Profile {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// File-backed configuration and profile store.
pub struct ConfigStore {
    config_file: PathBuf,
    profiles_file: PathBuf,
}

impl ConfigStore {
    /// Open under the default data dir (`~/.slipway`).
    pub async fn open_default() -> Result<Self, DeployError> {
        Self::open(store::default_data_dir()?).await
    }

    /// Open under a custom directory.
    pub async fn open(config_dir: PathBuf) -> Result<Self, DeployError> {
        tokio::fs::create_dir_all(&config_dir)
            .await
            .map_err(|e| DeployError::Storage(format!("failed to create config dir: {}", e)))?;

        Ok(Self {
            config_file: config_dir.join("config.json"),
            profiles_file: config_dir.join("profiles.json"),
        })
    }

    // ───────────────────────────────────────────────────────────────
    // Key-value settings
    // ───────────────────────────────────────────────────────────────

    /// Set a configuration value.
    pub async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), DeployError> {
        let _lock = StoreLock::acquire(&self.config_file).await?;
        let mut config: BTreeMap<String, serde_json::Value> =
            store::load_or_default(&self.config_file).await?;
        config.insert(key.to_string(), value);
        store::save_pretty(&self.config_file, &config).await?;
        info!(key, "set config value");
        Ok(())
    }

    /// Get a configuration value.
    pub async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, DeployError> {
        let config: BTreeMap<String, serde_json::Value> =
            store::load_or_default(&self.config_file).await?;
        Ok(config.get(key).cloned())
    }

    /// Remove a configuration value.
    pub async fn unset(&self, key: &str) -> Result<(), DeployError> {
        let _lock = StoreLock::acquire(&self.config_file).await?;
        let mut config: BTreeMap<String, serde_json::Value> =
            store::load_or_default(&self.config_file).await?;

        if config.remove(key).is_some() {
            store::save_pretty(&self.config_file, &config).await?;
            info!(key, "unset config value");
        } else {
            warn!(key, "config key not found");
        }
        Ok(())
    }

    /// All configuration values.
    pub async fn list_all(&self) -> Result<BTreeMap<String, serde_json::Value>, DeployError> {
        store::load_or_default(&self.config_file).await
    }

    // ───────────────────────────────────────────────────────────────
    // Profiles
    // ───────────────────────────────────────────────────────────────

    /// Create or replace a profile.
    pub async fn save_profile(&self, name: &str, profile: &Profile) -> Result<(), DeployError> {
        let _lock = StoreLock::acquire(&self.profiles_file).await?;
        let mut profiles: BTreeMap<String, Profile> =
            store::load_or_default(&self.profiles_file).await?;
        profiles.insert(name.to_string(), profile.clone());
        store::save_pretty(&self.profiles_file, &profiles).await?;
        info!(name, environment = %profile.environment, "saved profile");
        Ok(())
    }

    /// Get a profile by name.
    pub async fn profile(&self, name: &str) -> Result<Option<Profile>, DeployError> {
        let profiles: BTreeMap<String, Profile> =
            store::load_or_default(&self.profiles_file).await?;
        Ok(profiles.get(name).cloned())
    }

    /// All profiles by name.
    pub async fn list_profiles(&self) -> Result<BTreeMap<String, Profile>, DeployError> {
        store::load_or_default(&self.profiles_file).await
    }

    /// Delete a profile. Unknown names are a warning, not an error.
    pub async fn delete_profile(&self, name: &str) -> Result<(), DeployError> {
        let _lock = StoreLock::acquire(&self.profiles_file).await?;
        let mut profiles: BTreeMap<String, Profile> =
            store::load_or_default(&self.profiles_file).await?;

        if profiles.remove(name).is_some() {
            store::save_pretty(&self.profiles_file, &profiles).await?;
            info!(name, "deleted profile");
        } else {
            warn!(name, "profile not found");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_config() -> (tempfile::TempDir, ConfigStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ConfigStore::open(dir.path().to_path_buf()).await.unwrap();
        (dir, config)
    }

    #[tokio::test]
    async fn test_set_get_unset() {
        let (_dir, config) = temp_config().await;

        config.set("playbook", "deploy.yml".into()).await.unwrap();
        assert_eq!(
            config.get("playbook").await.unwrap(),
            Some(serde_json::Value::String("deploy.yml".to_string()))
        );

        config.unset("playbook").await.unwrap();
        assert!(config.get("playbook").await.unwrap().is_none());

        // Unsetting a missing key is not an error.
        config.unset("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_profile_roundtrip() {
        let (_dir, config) = temp_config().await;

        let profile = Profile {
            host: Some("10.0.0.5".to_string()),
            user: Some("ubuntu".to_string()),
            descriptor: Some("docker-compose.yml".to_string()),
            env_file: None,
            environment: "staging".to_string(),
        };
        config.save_profile("staging", &profile).await.unwrap();

        let loaded = config.profile("staging").await.unwrap().unwrap();
        assert_eq!(loaded.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(loaded.environment, "staging");
        assert!(!loaded.is_production());

        assert!(config.profile("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_production_detection() {
        let profile = Profile {
            environment: "production".to_string(),
            ..Default::default()
        };
        assert!(profile.is_production());
        assert!(!Profile::default().is_production());
    }

    #[tokio::test]
    async fn test_environment_defaults_on_load() {
        let (dir, config) = temp_config().await;

        // A hand-edited profile without the environment field.
        tokio::fs::write(
            dir.path().join("profiles.json"),
            r#"{"legacy": {"host": "10.0.0.9"}}"#,
        )
        .await
        .unwrap();

        let loaded = config.profile("legacy").await.unwrap().unwrap();
        assert_eq!(loaded.environment, "development");
    }

    #[tokio::test]
    async fn test_delete_profile() {
        let (_dir, config) = temp_config().await;

        config
            .save_profile("tmp", &Profile::default())
            .await
            .unwrap();
        config.delete_profile("tmp").await.unwrap();
        assert!(config.profile("tmp").await.unwrap().is_none());

        config.delete_profile("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_profiles() {
        let (_dir, config) = temp_config().await;

        config
            .save_profile("a", &Profile::default())
            .await
            .unwrap();
        config
            .save_profile("b", &Profile::default())
            .await
            .unwrap();

        let all = config.list_profiles().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key("a"));
    }
}
