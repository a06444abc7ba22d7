//! Ephemeral target descriptor for the external executor.
//!
//! The executor consumes a host inventory file describing where to
//! connect and how to authenticate. The descriptor is generated per
//! run, written to a transient file, and removed when the handle drops.

use crate::error::DeployError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

static FILE_SEQ: AtomicU64 = AtomicU64::new(0);

/// How the executor authenticates against the target host.
#[derive(Debug, Clone)]
pub enum Auth {
    /// Path to an SSH private key.
    IdentityFile(String),
    /// SSH password.
    Password(String),
}

/// Connection description for a single target host.
#[derive(Debug, Clone)]
pub struct TargetDescriptor {
    host: String,
    user: Option<String>,
    auth: Option<Auth>,
}

impl TargetDescriptor {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            auth: None,
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

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Render the descriptor as executor inventory YAML.
    pub fn to_yaml(&self) -> Result<String, DeployError> {
        let (key_file, password) = match &self.auth {
            Some(Auth::IdentityFile(path)) => (Some(path.clone()), None),
            Some(Auth::Password(password)) => (None, Some(password.clone())),
            None => (None, None),
        };

        let mut hosts = BTreeMap::new();
        hosts.insert(
            "target_host".to_string(),
            HostVars {
                ansible_host: self.host.clone(),
                ansible_user: self.user.clone(),
                ansible_connection: "ssh".to_string(),
                ansible_ssh_common_args: "-o StrictHostKeyChecking=no".to_string(),
                ansible_ssh_private_key_file: key_file,
                ansible_ssh_pass: password,
            },
        );

        let inventory = Inventory {
            all: Group {
                hosts,
                vars: GroupVars {
                    ansible_python_interpreter: "/usr/bin/python3".to_string(),
                },
            },
        };

        serde_yaml::to_string(&inventory)
            .map_err(|e| DeployError::InvalidState(format!("failed to render inventory: {}", e)))
    }

    /// Write the descriptor to a transient file in the temp dir.
    pub async fn write_transient(&self) -> Result<TransientInventory, DeployError> {
        let seq = FILE_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "slipway-inventory-{}-{}.yml",
            std::process::id(),
            seq
        ));

        tokio::fs::write(&path, self.to_yaml()?)
            .await
            .map_err(|e| DeployError::Storage(format!("failed to write inventory: {}", e)))?;

        debug!(path = %path.display(), host = %self.host, "wrote target descriptor");
        Ok(TransientInventory { path })
    }
}

/// A written inventory file, removed on drop.
#[derive(Debug)]
pub struct TransientInventory {
    path: PathBuf,
}

impl TransientInventory {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TransientInventory {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[derive(Serialize)]
struct Inventory {
    all: Group,
}

#[derive(Serialize)]
struct Group {
    hosts: BTreeMap<String, HostVars>,
    vars: GroupVars,
}

#[derive(Serialize)]
struct HostVars {
    ansible_host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ansible_user: Option<String>,
    ansible_connection: String,
    ansible_ssh_common_args: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ansible_ssh_private_key_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ansible_ssh_pass: Option<String>,
}

#[derive(Serialize)]
struct GroupVars {
    ansible_python_interpreter: String,
}
