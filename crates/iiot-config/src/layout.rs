//! Repository layout and path resolution
//!
//! A box repository is recognized by its `iiotctl.json` marker at the
//! root. All well-known paths (sealed config, patch locations, jq
//! modules, the project talosconfig) hang off the discovered root.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Project config file that marks the repository root
pub const PROJECT_CONFIG_FILE: &str = "iiotctl.json";

/// Pinned tool versions, asdf format
pub const TOOL_VERSIONS_FILE: &str = ".tool-versions";

/// Glob patterns (relative to the root) where machine-config patches live
pub const PATCH_LOCATIONS: &[&str] = &[
    "machine/config/*/_*.jq",
    "system-apps/*/machine-patches/_*.jq",
];

/// Patches applied only at bootstrap, excluded from sync and status
pub const BOOT_PATCH_GLOB: &str = "**/_*.boot.jq";

/// Resolved repository layout
#[derive(Debug, Clone)]
pub struct RepoLayout {
    root: PathBuf,
}

impl RepoLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walk up from `start` until a directory containing `iiotctl.json`
    /// is found.
    pub fn discover(start: &Path) -> Result<Self> {
        let mut current = start.to_path_buf();
        loop {
            if current.join(PROJECT_CONFIG_FILE).is_file() {
                return Ok(Self::new(current));
            }
            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                return Err(Error::RepoNotFound {
                    marker: PROJECT_CONFIG_FILE.to_string(),
                    start: start.to_path_buf(),
                });
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_config(&self) -> PathBuf {
        self.root.join(PROJECT_CONFIG_FILE)
    }

    pub fn tool_versions(&self) -> PathBuf {
        self.root.join(TOOL_VERSIONS_FILE)
    }

    pub fn machine_dir(&self) -> PathBuf {
        self.root.join("machine")
    }

    /// Installer image spec describing extensions and baked images
    pub fn installer_spec(&self) -> PathBuf {
        self.machine_dir().join("installer-images.yaml")
    }

    /// Directory holding the sealed config archive and its hash record
    pub fn sealed_dir(&self) -> PathBuf {
        self.machine_dir().join("config-sealed")
    }

    pub fn hash_file(&self) -> PathBuf {
        self.sealed_dir().join("config.hash")
    }

    pub fn sealed_file(&self) -> PathBuf {
        self.sealed_dir().join("config-sealed.asc")
    }

    pub fn public_key_file(&self) -> PathBuf {
        self.sealed_dir().join("public-key.gpg")
    }

    /// Shared jq module library available to every patch via `-L`
    pub fn jq_modules_dir(&self) -> PathBuf {
        self.machine_dir().join("jq-utils")
    }

    /// The talosconfig that routes through the teleport tunnel
    pub fn project_talosconfig(&self) -> PathBuf {
        self.machine_dir().join("talosconfig-teleport")
    }

    /// Scratch directory for generated artifacts (backups, exports)
    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join(".tasks")
    }
}
