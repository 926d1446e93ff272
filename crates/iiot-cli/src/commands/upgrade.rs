//! Upgrade commands for the box's Talos OS and its Kubernetes cluster

use colored::Colorize;
use dialoguer::Confirm;

use iiot_machine::{
    current_kube_context, talos_upgrade_overview, upgrade_k8s, upgrade_talos, ExtensionComparison,
    K8sUpgradeArgs, RequiredTool, UpgradeOverview,
};

use crate::commands::{open_session, print_extension_changes, print_tunnel_reminder};
use crate::error::Result;

/// Run the Talos upgrade workflow.
pub fn run_upgrade_talos(
    no_preserve: bool,
    no_stage: bool,
    verbose: bool,
    use_current_context: bool,
) -> Result<()> {
    let session = open_session(use_current_context)?;
    session.preflight(&[RequiredTool::Talosctl, RequiredTool::Jq])?;
    print_tunnel_reminder(use_current_context);

    let overview = talos_upgrade_overview(&session)?;
    print_talos_overview(&overview);
    print_extension_changes(&overview.extensions);
    if overview.extensions.in_sync() {
        print_current_extensions(&overview.extensions);
        println!("There aren't any diffs between repo and live talos system extensions.");
        println!("They are synced.");
        println!();
    }

    if Confirm::new()
        .with_prompt("Start upgrading?")
        .default(false)
        .interact()?
    {
        println!();
        println!("It takes a while (~ 5 min) before the machine can be reconnected.");
        println!("Restart the talos API tunnel once the box is back up.");
        upgrade_talos(&session, &overview, verbose, !no_preserve, !no_stage)?;
    }
    Ok(())
}

/// Run the Kubernetes upgrade workflow.
pub fn run_upgrade_k8s(dry_run: bool, preload: bool, use_current_context: bool) -> Result<()> {
    let session = open_session(use_current_context)?;
    session.preflight(&[RequiredTool::Kubectl, RequiredTool::Talosctl])?;
    print_tunnel_reminder(use_current_context);

    // probe the tunnel before anything else; a dead tunnel should fail
    // here and not halfway into the upgrade
    let live_version = session.client().live_version()?;
    tracing::debug!(%live_version, "talos API reachable");

    let node_name = session.client().node_name()?;
    println!("Selected talos node for the upgrade: {node_name}");
    println!();

    let k8s_context = current_kube_context(&session)?;
    println!("Selected k8s context for the upgrade: {k8s_context}");

    let to_version = session.config().k8s_version.clone();
    let confirmed = Confirm::new()
        .with_prompt(format!("Start upgrading to k8s {to_version} ?"))
        .default(false)
        .interact()?;
    println!();

    if confirmed {
        let args = K8sUpgradeArgs {
            to_version,
            pull_images: preload,
            dry_run,
        };
        upgrade_k8s(&session, &node_name, &args)?;
    }
    Ok(())
}

fn print_talos_overview(overview: &UpgradeOverview) {
    println!("{}", "TALOS".bold());
    println!();
    println!("  {:<20} {}", "Node", overview.node_name);
    println!("  {:<20} {}", "Installer image", overview.installer_image);
    println!("  {:<20} {}", "Repo version", overview.repo_version);
    println!("  {:<20} {}", "Live version", overview.live_version);
    println!();
}

fn print_current_extensions(extensions: &ExtensionComparison) {
    println!("{}", "Current extensions in repo and live:".bold());
    println!();
    println!("  {:<24} {}", "Name", "Version");
    for row in extensions.rows() {
        if let Some(version) = &row.repo {
            println!("  {:<24} {}", row.name, version);
        }
    }
    println!();
}
