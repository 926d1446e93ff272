//! Machine inspection and the sync workflow
//!
//! A [`MachineSession`] binds one repository checkout to one live
//! machine. The sync workflow runs in stages the command layer drives
//! in order: inspect, gate, probe the apply mode, then apply and seal.
//! Every stage is fallible and nothing earlier in the chain is
//! repeated, so the expensive live fetch happens exactly once.

use std::path::Path;

use iiot_config::{InstallerSpec, ProjectConfig, RepoLayout, ToolVersions};
use iiot_proc::{preflight, ToolCheck};

use crate::backup::export_backup;
use crate::diff::{unified_mc_diff, write_diff_file};
use crate::document::MachineConfig;
use crate::error::{Error, Result};
use crate::extensions::ExtensionComparison;
use crate::patch::{discover_bootstrap_patches, discover_patches, discover_sync_patches, PatchEngine};
use crate::plan::ApplyMode;
use crate::seal::{HashRecord, SealedLedger};
use crate::talos::{ConnectionArgs, TalosClient, DEFAULT_MACHINE_CONFIG_ID};
use crate::toolchain::Toolchain;

/// External tools a workflow may require
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredTool {
    Talosctl,
    Jq,
    Gpg,
    Kubectl,
}

/// Where the document fed into `patch_config` comes from
#[derive(Debug, Clone)]
pub enum PatchSource {
    /// The live machine config under this resource id
    Live { id: String },
    /// A freshly generated config, as on first boot
    Generated,
    /// Caller-supplied bytes, usually stdin
    Provided(Vec<u8>),
}

/// Result of a seal-config run
#[derive(Debug, Clone)]
pub enum SealOutcome {
    /// Hash was stale; a new archive and record were written
    Sealed(HashRecord),
    /// The record already matches the live config
    AlreadySealed,
}

/// Everything `status` and `sync` learn about a machine in one pass
#[derive(Debug, Clone)]
pub struct MachineReport {
    pub node_name: String,
    pub live_talos_version: String,
    pub live_k8s_version: String,
    pub live_mc: MachineConfig,
    pub candidate_mc: MachineConfig,
    pub mc_diff: String,
    pub extensions: ExtensionComparison,
    pub hash_stale: bool,
}

impl MachineReport {
    /// True when the live config already equals the patched candidate
    pub fn mc_in_sync(&self) -> bool {
        self.mc_diff.is_empty()
    }
}

/// One repository checkout bound to one live machine
#[derive(Debug)]
pub struct MachineSession {
    config: ProjectConfig,
    layout: RepoLayout,
    toolchain: Toolchain,
    tool_versions: ToolVersions,
    client: TalosClient,
    engine: PatchEngine,
    ledger: SealedLedger,
}

impl MachineSession {
    /// Open a session rooted at `layout`.
    ///
    /// By default talosctl is routed through the repo's own
    /// talosconfig, which expects the API tunnel to be up;
    /// `use_current_context` falls back to the operator's context.
    pub fn open(layout: RepoLayout, toolchain: Toolchain, use_current_context: bool) -> Result<Self> {
        let config = ProjectConfig::load(&layout.project_config())?;
        let tool_versions = ToolVersions::load(&layout.tool_versions())?;
        let conn = if use_current_context {
            ConnectionArgs::current_context()
        } else {
            ConnectionArgs::with_talosconfig(layout.project_talosconfig())
        };
        let client = TalosClient::new(&toolchain, conn);
        let engine = PatchEngine::new(&toolchain, layout.jq_modules_dir());
        let ledger = SealedLedger::new(&toolchain, &layout);
        Ok(Self {
            config,
            layout,
            toolchain,
            tool_versions,
            client,
            engine,
            ledger,
        })
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn layout(&self) -> &RepoLayout {
        &self.layout
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn client(&self) -> &TalosClient {
        &self.client
    }

    pub fn engine(&self) -> &PatchEngine {
        &self.engine
    }

    pub fn ledger(&self) -> &SealedLedger {
        &self.ledger
    }

    /// Verify the external tools a workflow needs before any of them
    /// run. Tools with a repo pin must report the pinned version.
    pub fn preflight(&self, tools: &[RequiredTool]) -> Result<()> {
        let mut checks = Vec::new();
        for tool in tools {
            let check = match tool {
                RequiredTool::Talosctl => {
                    ToolCheck::new(&self.toolchain.talosctl, ["version", "--client"])
                        .expect_version(self.tool_versions.require("talosctl")?)
                }
                RequiredTool::Jq => ToolCheck::new(&self.toolchain.jq, ["--version"])
                    .expect_version(self.tool_versions.require("jq")?),
                RequiredTool::Gpg => ToolCheck::new(&self.toolchain.gpg, ["--version"]),
                RequiredTool::Kubectl => {
                    ToolCheck::new(&self.toolchain.kubectl, ["version", "-o", "yaml", "--client"])
                        .expect_version(self.tool_versions.require("kubectl")?)
                }
            };
            checks.push(check);
        }
        preflight(&checks)?;
        Ok(())
    }

    /// Fetch the live state and compute everything a status or sync
    /// needs: the patched candidate, its diff, extension drift and the
    /// hash ledger verdict.
    pub fn inspect(&self, out_diff: Option<&Path>) -> Result<MachineReport> {
        let live_mc = self.client.fetch_mc(DEFAULT_MACHINE_CONFIG_ID)?;
        let live_talos_version = self.client.live_version()?;
        let live_k8s_version = self.engine.kubelet_version(&live_mc)?;
        let node_name = self.client.node_name()?;

        let patches = discover_sync_patches(self.layout.root())?;
        let candidate_mc = self.engine.apply(&live_mc, &patches, true)?;
        let mc_diff = unified_mc_diff(&live_mc, &candidate_mc);
        if let Some(path) = out_diff {
            write_diff_file(path, &mc_diff)?;
        }

        let spec = InstallerSpec::load(&self.layout.installer_spec())?;
        let repo_extensions = spec.extension_versions(&self.config.talos_installed_extensions)?;
        let live_extensions = self.client.extension_versions()?;
        let extensions = ExtensionComparison::new(repo_extensions, live_extensions);

        let hash_stale = self.ledger.is_stale(&live_mc);

        Ok(MachineReport {
            node_name,
            live_talos_version,
            live_k8s_version,
            live_mc,
            candidate_mc,
            mc_diff,
            extensions,
            hash_stale,
        })
    }

    /// Decide whether a sync may proceed at all.
    ///
    /// Version drift is overridable with `force` because upgrades are
    /// a separate workflow. A stale hash ledger is not: it means the
    /// machine changed outside of a sync, and only an explicit
    /// seal-config acknowledges that.
    pub fn gate_sync(&self, report: &MachineReport, force: bool) -> Result<()> {
        if report.live_talos_version != self.config.talos_version && !force {
            return Err(Error::VersionMismatch {
                component: "talos".to_string(),
                expected: self.config.talos_version.clone(),
                live: report.live_talos_version.clone(),
            });
        }
        if report.live_k8s_version != self.config.k8s_version && !force {
            return Err(Error::VersionMismatch {
                component: "k8s".to_string(),
                expected: self.config.k8s_version.clone(),
                live: report.live_k8s_version.clone(),
            });
        }
        if report.hash_stale {
            return Err(Error::HashDrift);
        }
        Ok(())
    }

    /// Dry-run the requested apply mode against the live machine
    pub fn probe_mode(&self, doc: &MachineConfig, mode: ApplyMode) -> Result<()> {
        let probe = self.client.probe_apply(doc, mode)?;
        if !probe.feasible {
            return Err(Error::ModeRejected {
                mode,
                stderr: probe.stderr,
            });
        }
        Ok(())
    }

    /// Back up the live config next to `target` before it is replaced
    pub fn backup_live(&self, report: &MachineReport, target: &Path) -> Result<std::path::PathBuf> {
        export_backup(&report.live_mc, target)
    }

    /// Apply the candidate for real, then seal what was applied
    pub fn apply_and_seal(&self, doc: &MachineConfig, mode: ApplyMode) -> Result<HashRecord> {
        self.client.apply(doc, mode)?;
        self.ledger.seal(doc)
    }

    /// Fetch a machine config by resource id, canonicalized
    pub fn fetch_config(&self, id: &str) -> Result<MachineConfig> {
        self.client.fetch_mc(id)
    }

    /// Re-seal the live config when the recorded hash went stale
    pub fn seal_config(&self, id: &str) -> Result<SealOutcome> {
        let live_mc = self.client.fetch_mc(id)?;
        if !self.ledger.is_stale(&live_mc) {
            return Ok(SealOutcome::AlreadySealed);
        }
        Ok(SealOutcome::Sealed(self.ledger.seal(&live_mc)?))
    }

    /// Run the patch pipeline over a chosen source document.
    ///
    /// With no explicit `patterns` the source decides the patch set:
    /// generated configs take every patch including first-boot ones,
    /// anything else takes the sync set.
    pub fn patch_config(&self, source: PatchSource, patterns: &[String]) -> Result<MachineConfig> {
        let root = self.layout.root();
        let initial = match &source {
            PatchSource::Live { id } => self.client.fetch_mc(id)?,
            PatchSource::Generated => {
                let (doc, _talosconfig) =
                    self.client.generate_config(&self.config.box_name, None)?;
                doc
            }
            PatchSource::Provided(bytes) => {
                let doc = MachineConfig::from_json(bytes)?;
                // Unlike fetched or generated configs, caller-supplied
                // bytes have never been near a validator.
                self.engine.validate(&doc)?;
                doc
            }
        };

        let patches = if patterns.is_empty() {
            match source {
                PatchSource::Generated => discover_bootstrap_patches(root)?,
                _ => discover_sync_patches(root)?,
            }
        } else {
            discover_patches(root, patterns)?
        };
        if patches.is_empty() {
            return Err(Error::NoPatchFiles);
        }

        self.engine.apply(&initial, &patches, true)
    }
}
