//! Sync command: drive the fetch → patch → diff → plan → apply → seal pipeline

use std::path::PathBuf;

use dialoguer::Confirm;

use iiot_machine::{ApplyMode, RequiredTool};

use crate::commands::{
    open_session, print_extension_changes, print_extension_upgrade_reminder, print_mc_changes,
    print_node_name, print_summary, print_tunnel_reminder,
};
use crate::error::Result;

/// Everything `sync` takes from the command line.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub out_diff: Option<PathBuf>,
    pub out_backup: PathBuf,
    pub apply_mode: String,
    pub dry_run: bool,
    pub use_current_context: bool,
    pub force: bool,
}

/// Run the sync workflow.
///
/// Same prologue as `status`, then the gates: version guards (bypassable
/// with `--force`) and the hash drift check (not bypassable; the operator
/// must re-seal first). A non-empty diff is probed in the requested apply
/// mode, confirmed interactively, backed up and applied, then sealed.
pub fn run_sync(options: &SyncOptions) -> Result<()> {
    let mode: ApplyMode = options.apply_mode.parse()?;

    let session = open_session(options.use_current_context)?;
    session.preflight(&[RequiredTool::Gpg, RequiredTool::Talosctl, RequiredTool::Jq])?;
    print_tunnel_reminder(options.use_current_context);

    let report = session.inspect(options.out_diff.as_deref())?;
    print_node_name(&report.node_name);
    print_extension_changes(&report.extensions);
    print_mc_changes(&report.mc_diff);
    print_summary(&report, &session);

    if report.live_talos_version != session.config().talos_version {
        println!("You should upgrade talos to the expected version");
        println!();
    }
    if report.live_k8s_version != session.config().k8s_version {
        println!("You should upgrade k8s to the expected version");
        println!();
    }
    session.gate_sync(&report, options.force)?;

    if !report.mc_in_sync() {
        println!("Test if the new config can be applied in '{mode}' mode (via dry-run) ...");
        session.probe_mode(&report.candidate_mc, mode)?;
        println!("The config can be applied via '{mode}'");
        println!();

        if options.dry_run {
            println!("Syncing in dry-run mode finished successfully");
        } else {
            let prompt = format!("Do you want to apply the new config (in '{mode}' mode)?");
            if Confirm::new().with_prompt(prompt).default(false).interact()? {
                let backup = session.backup_live(&report, &options.out_backup)?;
                println!();
                println!("The backup of the mc is saved at:\n'{}'", backup.display());
                println!();

                session.apply_and_seal(&report.candidate_mc, mode)?;
                println!("Syncing finished successfully");
            }
        }
    }

    print_extension_upgrade_reminder(&report.extensions);
    Ok(())
}
