//! The talosctl gateway
//!
//! Wraps every talosctl invocation the workflows need. Connection
//! routing is explicit: a [`ConnectionArgs`] value is built once per
//! command run and appended to each invocation, so there is no hidden
//! state deciding which machine gets touched.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::document::MachineConfig;
use crate::error::{Error, Result};
use crate::plan::ApplyMode;
use crate::toolchain::Toolchain;
use iiot_proc::{ToolCommand, ToolOutput};

/// Default machine config resource id
pub const DEFAULT_MACHINE_CONFIG_ID: &str = "v1alpha1";

/// Deadline for the version probe; a hung tunnel should fail fast
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Extracts the version from a `Tag: vX.Y.Z` line of `talosctl version`
static VERSION_TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Tag: *v(\S+)").unwrap());

/// Extensions whose author contains this string ship with Talos itself
/// and are filtered out of the comparison.
const BUILTIN_EXTENSION_AUTHOR: &str = "Talos Machinery";

/// How to reach the machine's Talos API
#[derive(Debug, Clone, Default)]
pub struct ConnectionArgs {
    pub talosconfig: Option<PathBuf>,
    pub nodes: Vec<String>,
    pub endpoints: Vec<String>,
    pub insecure: bool,
}

impl ConnectionArgs {
    /// Route through a repo-local talosconfig, the default for all
    /// workflows that expect the API tunnel to be up
    pub fn with_talosconfig(path: impl Into<PathBuf>) -> Self {
        Self {
            talosconfig: Some(path.into()),
            ..Self::default()
        }
    }

    /// Use whatever context the operator's own talosconfig selects
    pub fn current_context() -> Self {
        Self::default()
    }

    /// Talk straight to a node that has no credentials yet, for the
    /// very first config apply
    pub fn insecure_node(node: impl Into<String>) -> Self {
        Self {
            nodes: vec![node.into()],
            insecure: true,
            ..Self::default()
        }
    }

    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.talosconfig {
            args.push(format!("--talosconfig={}", path.display()));
        }
        if !self.nodes.is_empty() {
            args.push(format!("--nodes={}", self.nodes.join(",")));
        }
        if !self.endpoints.is_empty() {
            args.push(format!("--endpoints={}", self.endpoints.join(",")));
        }
        if self.insecure {
            args.push("--insecure".to_string());
        }
        args
    }
}

/// Feasibility probe result of a dry-run apply
#[derive(Debug, Clone)]
pub struct ApplyProbe {
    pub feasible: bool,
    pub stderr: String,
}

/// Arguments for `talosctl upgrade`
#[derive(Debug, Clone)]
pub struct TalosUpgradeArgs {
    pub image: String,
    pub preserve: bool,
    pub stage: bool,
    pub wait: bool,
    pub debug: bool,
}

/// Client for one machine, bound to a connection route
#[derive(Debug, Clone)]
pub struct TalosClient {
    program: String,
    conn: ConnectionArgs,
}

impl TalosClient {
    pub fn new(toolchain: &Toolchain, conn: ConnectionArgs) -> Self {
        Self {
            program: toolchain.talosctl.clone(),
            conn,
        }
    }

    /// Build an invocation; connection args always come last so they
    /// can never be mistaken for a flag value
    fn command<I, S>(&self, args: I) -> ToolCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ToolCommand::new(&self.program)
            .args(args)
            .args(self.conn.to_args())
    }

    /// Fetch the live machine config resource and canonicalize its spec
    pub fn fetch_mc(&self, id: &str) -> Result<MachineConfig> {
        let output = self
            .command(["get", "mc", id, "-o", "json"])
            .output()
            .map_err(|err| Error::Fetch {
                stderr: tool_stderr(err),
            })?;
        MachineConfig::from_resource_envelope(&output.stdout)
    }

    /// The Talos version the machine itself reports.
    ///
    /// `talosctl version` prints a client and a server tag; anything
    /// other than exactly two means the probe did not reach the
    /// machine, so the output is surfaced as the error.
    pub fn live_version(&self) -> Result<String> {
        let output = self
            .command(["version"])
            .timeout(VERSION_PROBE_TIMEOUT)
            .output()?;
        let text = output.stdout_text();
        let versions: Vec<String> = VERSION_TAG_PATTERN
            .captures_iter(&text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .collect();
        if versions.len() != 2 {
            return Err(Error::VersionProbe { output: text });
        }
        Ok(versions.into_iter().nth(1).unwrap_or_default())
    }

    /// Fetch a Talos resource as JSON documents.
    ///
    /// talosctl emits one JSON document per resource instance,
    /// concatenated, so the output is decoded as a stream.
    pub fn resources(&self, name: &str) -> Result<Vec<serde_json::Value>> {
        let output = self.command(["get", name, "-o", "json"]).output()?;
        let mut values = Vec::new();
        for value in
            serde_json::Deserializer::from_slice(&output.stdout).into_iter::<serde_json::Value>()
        {
            values.push(value?);
        }
        Ok(values)
    }

    /// The node name the connection currently selects
    pub fn node_name(&self) -> Result<String> {
        let resources = self.resources("nodename")?;
        resources
            .first()
            .and_then(|value| value.pointer("/spec/nodename"))
            .and_then(|name| name.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::UnexpectedShape {
                what: "nodename resource".to_string(),
                message: "missing spec.nodename".to_string(),
            })
    }

    /// Versions of the third-party system extensions running live.
    ///
    /// Extensions authored by Talos itself are part of the base image
    /// and never appear in the installer spec, so they are skipped.
    pub fn extension_versions(&self) -> Result<BTreeMap<String, String>> {
        let mut live = BTreeMap::new();
        for resource in self.resources("extensions")? {
            let Some(metadata) = resource.pointer("/spec/metadata") else {
                continue;
            };
            match metadata.get("author").and_then(|a| a.as_str()) {
                None => continue,
                Some(author) if author.contains(BUILTIN_EXTENSION_AUTHOR) => continue,
                Some(_) => {}
            }
            if let (Some(name), Some(version)) = (
                metadata.get("name").and_then(|n| n.as_str()),
                metadata.get("version").and_then(|v| v.as_str()),
            ) {
                live.insert(name.to_string(), version.to_string());
            }
        }
        Ok(live)
    }

    /// Dry-run an apply in `mode`, reporting feasibility and the
    /// rejection text instead of erroring
    pub fn probe_apply(&self, doc: &MachineConfig, mode: ApplyMode) -> Result<ApplyProbe> {
        let output = self.run_apply(doc, mode, true)?;
        Ok(ApplyProbe {
            feasible: output.success,
            stderr: output.stderr,
        })
    }

    /// Apply a config for real
    pub fn apply(&self, doc: &MachineConfig, mode: ApplyMode) -> Result<()> {
        let output = self.run_apply(doc, mode, false)?;
        if !output.success {
            return Err(Error::Apply {
                mode,
                stderr: output.stderr,
            });
        }
        Ok(())
    }

    fn run_apply(&self, doc: &MachineConfig, mode: ApplyMode, dry_run: bool) -> Result<ToolOutput> {
        let dir = tempfile::Builder::new().prefix("talos-apply").tempdir()?;
        let file = dir.path().join("mc.json");
        fs::write(&file, doc.as_bytes())?;
        let mut args = vec![
            "apply-config".to_string(),
            "--file".to_string(),
            file.to_string_lossy().into_owned(),
            format!("--mode={mode}"),
        ];
        if dry_run {
            args.push("--dry-run".to_string());
        }
        Ok(self.command(args).status()?)
    }

    /// Generate a fresh controlplane config and matching talosconfig
    /// for a cluster that does not exist yet.
    ///
    /// Runs locally, so connection routing is deliberately not applied.
    pub fn generate_config(
        &self,
        cluster_name: &str,
        install_image: Option<&str>,
    ) -> Result<(MachineConfig, Vec<u8>)> {
        let dir = tempfile::Builder::new()
            .prefix("talos-gen-config")
            .tempdir()?;
        let mut command = ToolCommand::new(&self.program)
            .args(["gen", "config", "--output-dir"])
            .arg(dir.path().to_string_lossy())
            .arg(cluster_name)
            .arg(format!("https://{cluster_name}:6443"));
        if let Some(image) = install_image {
            command = command.arg(format!("--install-image={image}"));
        }
        command.output()?;
        let controlplane = fs::read(dir.path().join("controlplane.yaml"))?;
        let talosconfig = fs::read(dir.path().join("talosconfig"))?;
        Ok((MachineConfig::from_yaml(&controlplane)?, talosconfig))
    }

    /// Upgrade the Talos installation, streaming talosctl's output to
    /// the terminal
    pub fn upgrade(&self, args: &TalosUpgradeArgs) -> Result<()> {
        let mut cli_args = vec![
            "upgrade".to_string(),
            format!("--image={}", args.image),
            format!("--preserve={}", args.preserve),
            format!("--stage={}", args.stage),
            format!("--wait={}", args.wait),
        ];
        if args.debug {
            cli_args.push("--debug".to_string());
        }
        Ok(self.command(cli_args).stream()?)
    }

    /// Prepared `talosctl upgrade-k8s` invocation, spawned by the
    /// upgrade workflow next to its api-server port-forward
    pub fn upgrade_k8s_command(
        &self,
        to_version: &str,
        pull_images: bool,
        dry_run: bool,
    ) -> ToolCommand {
        let mut args = vec![
            "upgrade-k8s".to_string(),
            "--to".to_string(),
            to_version.to_string(),
            format!("--pre-pull-images={pull_images}"),
            "--endpoint".to_string(),
            "localhost".to_string(),
        ];
        if dry_run {
            args.push("--dry-run".to_string());
        }
        self.command(args)
    }
}

fn tool_stderr(err: iiot_proc::Error) -> String {
    match err {
        iiot_proc::Error::Failed { stderr, .. } => stderr,
        other => other.to_string(),
    }
}
