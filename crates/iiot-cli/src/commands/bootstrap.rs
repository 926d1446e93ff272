//! Bootstrap command: first-contact provisioning of a factory-fresh box

use std::path::{Path, PathBuf};

use iiot_machine::{BootstrapOptions, BootstrapOutcome, RequiredTool};

use crate::commands::open_session;
use crate::error::Result;

/// Run the bootstrap workflow against a machine reachable only by IP.
///
/// The box has no trusted credentials yet, so this is the one flow that
/// talks to the talos API insecurely instead of through the tunnel.
pub fn run_bootstrap(
    machine_ip: &str,
    out_mc: Option<&Path>,
    out_talosconfig: &Path,
    dry_run: bool,
    force: bool,
) -> Result<()> {
    let session = open_session(false)?;
    session.preflight(&[RequiredTool::Jq, RequiredTool::Gpg, RequiredTool::Talosctl])?;

    let options = BootstrapOptions {
        machine_ip: machine_ip.to_string(),
        out_mc: out_mc.map(Path::to_path_buf),
        out_talosconfig: Some(PathBuf::from(out_talosconfig)),
        dry_run,
        force,
    };

    match iiot_machine::run_bootstrap(&session, &options)? {
        BootstrapOutcome::DryRun => {
            println!("Bootstrapping in dry-run mode finished successfully");
            println!("When the created config is used, seal the mc with 'iiotctl seal-config'");
        }
        BootstrapOutcome::Applied { .. } => {
            println!("Applied the initial config to the machine ({machine_ip})");
            println!("Sealed the config and patched the machine CA into the repo talosconfig");
            println!("Bootstrapping finished successfully");
        }
    }
    Ok(())
}
