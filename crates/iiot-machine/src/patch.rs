//! Patch discovery and the jq patch pipeline
//!
//! Patches are jq filter files scattered through the repository. Their
//! apply order is the lexicographic order of their repo-relative
//! paths, so the on-disk layout is the single source of truth for
//! sequencing. The pipeline feeds the document through one `jq -S`
//! process per patch and revalidates after every step, which pins a
//! validation failure to the patch that introduced it.

use std::fs;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use iiot_config::layout::{BOOT_PATCH_GLOB, PATCH_LOCATIONS};
use iiot_proc::ToolCommand;

use crate::document::MachineConfig;
use crate::error::{Error, Result};
use crate::toolchain::Toolchain;

/// jq filter that extracts the kubelet version from a machine config
const KUBELET_VERSION_FILTER: &str = r#".machine.kubelet.image | match("(?<=:v).*").string"#;

/// jq filter that extracts the machine CA certificate
const MACHINE_CA_FILTER: &str = ".machine.ca.crt";

/// A jq patch file found in the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFile {
    path: PathBuf,
    relative: PathBuf,
    boot_only: bool,
}

impl PatchFile {
    /// Absolute path of the patch file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path relative to the repo root; doubles as the sort key
    pub fn relative(&self) -> &Path {
        &self.relative
    }

    /// True for first-boot patches that never run during a sync
    pub fn boot_only(&self) -> bool {
        self.boot_only
    }
}

/// Find patch files under `root` matching `patterns`, sorted by their
/// repo-relative path string.
pub fn discover_patches<S: AsRef<str>>(root: &Path, patterns: &[S]) -> Result<Vec<PatchFile>> {
    let boot_pattern = Pattern::new(BOOT_PATCH_GLOB)?;
    let match_options = MatchOptions {
        require_literal_separator: true,
        ..MatchOptions::default()
    };

    let mut files = Vec::new();
    for pattern in patterns {
        let full = root.join(pattern.as_ref());
        for entry in glob::glob(&full.to_string_lossy())? {
            let path = entry?;
            if !path.is_file() {
                continue;
            }
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            let boot_only = boot_pattern.matches_path_with(&relative, match_options);
            files.push(PatchFile {
                path,
                relative,
                boot_only,
            });
        }
    }
    files.sort_by(|a, b| {
        a.relative
            .to_string_lossy()
            .cmp(&b.relative.to_string_lossy())
    });
    files.dedup();
    Ok(files)
}

/// All patches that participate in a sync: the standard locations
/// minus first-boot patches.
pub fn discover_sync_patches(root: &Path) -> Result<Vec<PatchFile>> {
    let patches = discover_patches(root, PATCH_LOCATIONS)?;
    Ok(patches.into_iter().filter(|p| !p.boot_only()).collect())
}

/// All patches including first-boot ones, for bootstrapping a machine
pub fn discover_bootstrap_patches(root: &Path) -> Result<Vec<PatchFile>> {
    discover_patches(root, PATCH_LOCATIONS)
}

/// Applies jq filters to machine configs
#[derive(Debug, Clone)]
pub struct PatchEngine {
    jq: String,
    talosctl: String,
    modules_dir: PathBuf,
}

impl PatchEngine {
    pub fn new(toolchain: &Toolchain, modules_dir: impl Into<PathBuf>) -> Self {
        Self {
            jq: toolchain.jq.clone(),
            talosctl: toolchain.talosctl.clone(),
            modules_dir: modules_dir.into(),
        }
    }

    /// Apply `patches` in order, revalidating after every step when
    /// `validate` is set. Fails fast with the offending patch path.
    pub fn apply(
        &self,
        initial: &MachineConfig,
        patches: &[PatchFile],
        validate: bool,
    ) -> Result<MachineConfig> {
        let mut doc = initial.clone();
        for patch in patches {
            tracing::debug!(patch = %patch.relative().display(), "applying patch");
            doc = self.apply_one(&doc, patch)?;
            if validate {
                self.validate(&doc).map_err(|err| match err {
                    Error::Validation { stderr } => Error::PatchValidation {
                        patch: patch.path().to_path_buf(),
                        stderr,
                    },
                    other => other,
                })?;
            }
        }
        Ok(doc)
    }

    fn apply_one(&self, doc: &MachineConfig, patch: &PatchFile) -> Result<MachineConfig> {
        let output = ToolCommand::new(&self.jq)
            .arg("-S")
            .arg("-L")
            .arg(self.modules_dir.to_string_lossy())
            .arg("-f")
            .arg(patch.path().to_string_lossy())
            .stdin_bytes(doc.as_bytes().to_vec())
            .status()?;
        if !output.success {
            return Err(Error::PatchApplication {
                patch: patch.path().to_path_buf(),
                stderr: output.stderr,
            });
        }
        MachineConfig::from_json(&output.stdout)
    }

    /// Run the machine-config validator against `doc`
    pub fn validate(&self, doc: &MachineConfig) -> Result<()> {
        let dir = tempfile::Builder::new().prefix("talos-validate").tempdir()?;
        let file = dir.path().join("mc.json");
        fs::write(&file, doc.as_bytes())?;
        let output = ToolCommand::new(&self.talosctl)
            .args(["validate", "--mode=metal", "-c"])
            .arg(file.to_string_lossy())
            .status()?;
        if !output.success {
            return Err(Error::Validation {
                stderr: output.stderr,
            });
        }
        Ok(())
    }

    /// Evaluate a jq filter over `doc`, returning raw string output
    pub fn query(&self, doc: &MachineConfig, filter: &str) -> Result<String> {
        let output = ToolCommand::new(&self.jq)
            .args(["-r", filter])
            .stdin_bytes(doc.as_bytes().to_vec())
            .output()?;
        Ok(output.stdout_text())
    }

    /// The kubelet version pinned inside `doc`
    pub fn kubelet_version(&self, doc: &MachineConfig) -> Result<String> {
        self.query(doc, KUBELET_VERSION_FILTER)
    }

    /// The machine CA certificate embedded in `doc`
    pub fn machine_ca(&self, doc: &MachineConfig) -> Result<String> {
        self.query(doc, MACHINE_CA_FILTER)
    }
}
