//! Status command: report drift between the repo and the live machine

use std::path::Path;

use iiot_machine::{plan_apply, ApplyPlan, RequiredTool};

use crate::commands::{
    open_session, print_extension_changes, print_extension_upgrade_reminder,
    print_hash_drift_warning, print_mc_changes, print_node_name, print_summary,
    print_tunnel_reminder,
};
use crate::error::Result;

/// Run the status workflow.
///
/// Purely informational: reports drift and reboot necessity but never
/// mutates the machine, and drift alone never fails the process.
pub fn run_status(out_diff: Option<&Path>, use_current_context: bool) -> Result<()> {
    let session = open_session(use_current_context)?;
    session.preflight(&[RequiredTool::Gpg, RequiredTool::Talosctl, RequiredTool::Jq])?;
    print_tunnel_reminder(use_current_context);

    let report = session.inspect(out_diff)?;
    print_node_name(&report.node_name);
    print_extension_changes(&report.extensions);
    print_mc_changes(&report.mc_diff);
    print_summary(&report, &session);
    print_hash_drift_warning(report.hash_stale);

    if !report.mc_in_sync() {
        tracing::debug!("probing whether the new config needs a reboot");
        match plan_apply(session.client(), &report.candidate_mc)? {
            ApplyPlan::NoReboot => println!("The new config can be applied without a reboot"),
            ApplyPlan::Reboot { .. } => println!("The new config must be applied with a reboot"),
        }
    }

    print_extension_upgrade_reminder(&report.extensions);
    Ok(())
}
