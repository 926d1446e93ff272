//! Command implementations for iiotctl

pub mod bootstrap;
pub mod config;
pub mod status;
pub mod sync;
pub mod upgrade;

pub use bootstrap::run_bootstrap;
pub use config::{run_fetch_config, run_patch_config, run_seal_config};
pub use status::run_status;
pub use sync::{run_sync, SyncOptions};
pub use upgrade::{run_upgrade_k8s, run_upgrade_talos};

use std::env;

use colored::Colorize;

use iiot_config::RepoLayout;
use iiot_machine::{ExtensionComparison, MachineReport, MachineSession, Toolchain};

use crate::error::Result;

/// Open a machine session for the repository containing the current directory.
pub(crate) fn open_session(use_current_context: bool) -> Result<MachineSession> {
    let cwd = env::current_dir()?;
    let layout = RepoLayout::discover(&cwd)?;
    let session = MachineSession::open(layout, Toolchain::default(), use_current_context)?;
    Ok(session)
}

/// All machine commands except bootstrap reach the box through the
/// repo-managed tunnel talosconfig unless told otherwise.
pub(crate) fn print_tunnel_reminder(use_current_context: bool) {
    if !use_current_context {
        println!("Ensure the talos API tunnel to the box is running");
    }
}

pub(crate) fn print_node_name(node_name: &str) {
    println!();
    println!("Selected talos node: '{node_name}'");
    println!();
}

pub(crate) fn print_extension_changes(extensions: &ExtensionComparison) {
    if extensions.in_sync() {
        return;
    }
    println!("{}", "The talos system extensions are out of sync:".bold());
    println!();
    println!("  {:<4}  {:<24} {:<16} {}", "Sync", "Extension", "Repo", "Live");
    for row in extensions.rows() {
        println!(
            "  {}    {:<24} {:<16} {}",
            sync_mark(row.synced()),
            row.name,
            row.repo.as_deref().unwrap_or("-"),
            row.live.as_deref().unwrap_or("-"),
        );
    }
    println!();
}

pub(crate) fn print_mc_changes(diff: &str) {
    if diff.is_empty() {
        return;
    }
    println!("{}", "The machine config is out of sync:".bold());
    println!();
    println!("{diff}");
    println!();
}

/// The five-row drift overview shared by `status` and `sync`.
pub(crate) fn print_summary(report: &MachineReport, session: &MachineSession) {
    let config = session.config();
    let talos_synced = report.live_talos_version == config.talos_version;
    let k8s_synced = report.live_k8s_version == config.k8s_version;

    println!("{}", "Summary".bold());
    println!();
    summary_row(
        talos_synced,
        "Talos version",
        &format!(
            "repo: '{}' | live: '{}'",
            config.talos_version, report.live_talos_version
        ),
    );
    summary_row(
        k8s_synced,
        "K8s version",
        &format!(
            "repo: '{}' | live: '{}'",
            config.k8s_version, report.live_k8s_version
        ),
    );
    summary_row(report.mc_in_sync(), "Machine config", sync_word(report.mc_in_sync()));
    summary_row(!report.hash_stale, "Machine config hash", sync_word(!report.hash_stale));
    summary_row(
        report.extensions.in_sync(),
        "Talos extensions",
        sync_word(report.extensions.in_sync()),
    );
    println!();
}

pub(crate) fn print_hash_drift_warning(stale: bool) {
    if stale {
        println!("Diff between saved machine config hash and live machine config hash");
        println!("Maybe the machine config was changed without the 'iiotctl sync' task?");
    }
}

pub(crate) fn print_extension_upgrade_reminder(extensions: &ExtensionComparison) {
    if !extensions.in_sync() {
        println!("Out of sync talos extensions => Executing 'iiotctl upgrade-talos' is required!");
    }
}

fn summary_row(synced: bool, name: &str, status: &str) {
    // the mark is two visible chars either way, so plain spacing lines up
    println!("  {}  {:<20} {}", sync_mark(synced), name, status);
}

fn sync_mark(synced: bool) -> colored::ColoredString {
    if synced {
        "OK".green().bold()
    } else {
        "!!".red().bold()
    }
}

fn sync_word(synced: bool) -> &'static str {
    if synced { "synced" } else { "out of sync" }
}
