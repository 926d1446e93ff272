//! Per-box project configuration (`iiotctl.json`)

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Static description of the box this repository manages.
///
/// Loaded once at process start and passed by reference into every
/// component that needs it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Hostname of the box; also its Kubernetes node name
    pub box_name: String,
    /// Talos version the repo is pinned to (no `v` prefix)
    pub talos_version: String,
    /// Kubernetes version the repo is pinned to (no `v` prefix)
    pub k8s_version: String,
    /// System extensions that must be baked into the installer image
    #[serde(default)]
    pub talos_installed_extensions: Vec<String>,
    /// Whether access is brokered through a teleport proxy
    #[serde(default)]
    pub teleport_enabled: bool,
    #[serde(default)]
    pub teleport_proxy_url: String,
    /// Whether the operator keeps a direct kubeconfig entry for the box
    #[serde(default)]
    pub local_k8s_access: bool,
    #[serde(default)]
    pub container_registries: Vec<String>,
    #[serde(default)]
    pub remote_monitoring: bool,
    #[serde(default)]
    pub is_dev_env: bool,
    #[serde(default)]
    pub project_repo: String,
    #[serde(default)]
    pub repo_on_github: bool,
    #[serde(default)]
    pub base_repo_version: String,
}

impl ProjectConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::parse(path, "project config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.box_name.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "box_name must not be empty".to_string(),
            });
        }
        if self.talos_version.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "talos_version must not be empty".to_string(),
            });
        }
        if self.k8s_version.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "k8s_version must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
