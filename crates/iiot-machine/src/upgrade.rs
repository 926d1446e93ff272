//! Talos and Kubernetes upgrade workflows
//!
//! The Kubernetes upgrade is the awkward one: `talosctl upgrade-k8s`
//! needs the cluster's api-server reachable on localhost, which only
//! holds while a kubectl port-forward runs next to it. The forward is
//! supervised for the whole upgrade and respawned if it dies, and the
//! guard kills it on every exit path.

use std::io::Read;
use std::path::PathBuf;
use std::process::Child;
use std::thread;
use std::time::Duration;

use iiot_proc::ToolCommand;

use crate::error::{Error, Result};
use crate::extensions::ExtensionComparison;
use crate::sync::MachineSession;
use crate::talos::TalosUpgradeArgs;

/// Grace period for the port-forward to bind before the upgrade starts
const FORWARD_STARTUP: Duration = Duration::from_secs(2);

/// Poll interval while the upgrade runs
const UPGRADE_POLL: Duration = Duration::from_secs(4);

/// What the operator reviews before confirming a Talos upgrade
#[derive(Debug, Clone)]
pub struct UpgradeOverview {
    pub node_name: String,
    pub installer_image: String,
    pub repo_version: String,
    pub live_version: String,
    pub extensions: ExtensionComparison,
}

/// Options for the Kubernetes upgrade
#[derive(Debug, Clone)]
pub struct K8sUpgradeArgs {
    pub to_version: String,
    pub pull_images: bool,
    pub dry_run: bool,
}

/// Kills the wrapped child on drop; failure paths and panics both
/// reach it, so no flow can leak a forward
struct KillOnDrop(Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// Collect what the operator must see before a Talos upgrade.
///
/// Probes the live machine directly; the patch pipeline is not involved
/// in an upgrade, only versions, the node identity and the extension
/// sets are.
pub fn talos_upgrade_overview(session: &MachineSession) -> Result<UpgradeOverview> {
    let live_version = session.client().live_version()?;
    let node_name = session.client().node_name()?;
    let spec = iiot_config::InstallerSpec::load(&session.layout().installer_spec())?;
    let required = &session.config().talos_installed_extensions;
    let installer_image = spec.installer_image_ref(required)?;
    let extensions = ExtensionComparison::new(
        spec.extension_versions(required)?,
        session.client().extension_versions()?,
    );
    Ok(UpgradeOverview {
        node_name,
        installer_image,
        repo_version: session.config().talos_version.clone(),
        live_version,
        extensions,
    })
}

/// Upgrade Talos to the repo-pinned installer image
pub fn upgrade_talos(
    session: &MachineSession,
    overview: &UpgradeOverview,
    verbose: bool,
    preserve: bool,
    stage: bool,
) -> Result<()> {
    let args = TalosUpgradeArgs {
        image: overview.installer_image.clone(),
        preserve,
        stage,
        // without wait the command returns as soon as the node accepts
        // the image; with it talosctl follows the whole reboot
        wait: verbose,
        debug: verbose,
    };
    session.client().upgrade(&args)
}

/// Upgrade Kubernetes through a supervised api-server port-forward.
///
/// The forward targets the kube-apiserver static pod on `node_name`
/// with the operator's own kubeconfig. It gets a short grace period to
/// bind; dying within it aborts the upgrade with kubectl's stderr.
/// After that the upgrade is polled and the forward respawned whenever
/// it drops, since a Talos upgrade of the control plane restarts the
/// api-server mid-flight.
pub fn upgrade_k8s(session: &MachineSession, node_name: &str, args: &K8sUpgradeArgs) -> Result<()> {
    let forward_command = port_forward_command(session, node_name)?;
    let mut forward = KillOnDrop(forward_command.spawn_background()?);
    thread::sleep(FORWARD_STARTUP);
    if forward.0.try_wait()?.is_some() {
        return Err(Error::PortForward {
            stderr: drain_stderr(&mut forward.0),
        });
    }

    let upgrade_command =
        session
            .client()
            .upgrade_k8s_command(&args.to_version, args.pull_images, args.dry_run);
    let mut upgrade = upgrade_command.spawn_foreground()?;

    let status = loop {
        if let Some(status) = upgrade.try_wait()? {
            break status;
        }
        if forward.0.try_wait()?.is_some() {
            tracing::warn!("api-server port-forward dropped, respawning");
            forward = KillOnDrop(forward_command.spawn_background()?);
        }
        thread::sleep(UPGRADE_POLL);
    };
    drop(forward);

    if !status.success() {
        return Err(Error::K8sUpgrade {
            exit_code: status.code(),
        });
    }
    Ok(())
}

/// The kubectl context the upgrade will talk to
pub fn current_kube_context(session: &MachineSession) -> Result<String> {
    let output = ToolCommand::new(&session.toolchain().kubectl)
        .args(["config", "current-context", "--kubeconfig"])
        .arg(user_kubeconfig()?.to_string_lossy())
        .output()?;
    Ok(output.stdout_text())
}

fn port_forward_command(session: &MachineSession, node_name: &str) -> Result<ToolCommand> {
    Ok(ToolCommand::new(&session.toolchain().kubectl)
        .args(["port-forward", "-n", "kube-system"])
        .arg(format!("pods/kube-apiserver-{node_name}"))
        .arg("6443:6443")
        .arg("--kubeconfig")
        .arg(user_kubeconfig()?.to_string_lossy()))
}

fn user_kubeconfig() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(Error::NoHomeDir)?;
    Ok(home.join(".kube").join("config"))
}

fn drain_stderr(child: &mut Child) -> String {
    let mut text = String::new();
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_string(&mut text);
    }
    text.trim_end().to_string()
}
