//! Machine-config utility commands: fetch, patch, seal

use std::io::{self, Read};

use iiot_machine::{PatchSource, RequiredTool, SealOutcome};

use crate::commands::{open_session, print_tunnel_reminder};
use crate::error::{CliError, Result};

/// Fetch a machine config from the live machine and print it to stdout.
pub fn run_fetch_config(id: &str, use_current_context: bool) -> Result<()> {
    let session = open_session(use_current_context)?;
    session.preflight(&[RequiredTool::Jq, RequiredTool::Talosctl])?;

    let mc = session.fetch_config(id)?;
    println!("{}", mc.to_text());
    Ok(())
}

/// Patch a machine config and print the result to stdout.
///
/// The input comes from the live machine (`--fetch`), a freshly generated
/// blank config (`--generate`) or stdin; stdin input is validated before
/// any patch touches it.
pub fn run_patch_config(
    fetch: bool,
    generate: bool,
    patterns: &[String],
    id: &str,
    use_current_context: bool,
) -> Result<()> {
    if generate && fetch {
        return Err(CliError::user(
            "Invalid flags. 'Generate' and 'fetch' are mutually exclusive.",
        ));
    }

    let session = open_session(use_current_context)?;
    session.preflight(&[RequiredTool::Jq, RequiredTool::Talosctl])?;

    let source = if generate {
        PatchSource::Generated
    } else if fetch {
        PatchSource::Live { id: id.to_string() }
    } else {
        let mut raw = Vec::new();
        io::stdin().read_to_end(&mut raw)?;
        PatchSource::Provided(raw)
    };

    let patched = session.patch_config(source, patterns)?;
    println!("{}", patched.to_text());
    Ok(())
}

/// Seal the live machine config when its hash has drifted from the repo.
pub fn run_seal_config(id: &str, use_current_context: bool) -> Result<()> {
    let session = open_session(use_current_context)?;
    session.preflight(&[RequiredTool::Gpg, RequiredTool::Talosctl])?;
    print_tunnel_reminder(use_current_context);

    match session.seal_config(id)? {
        SealOutcome::Sealed(_) => println!("Create new hash and sealed mc"),
        SealOutcome::AlreadySealed => {
            println!("There isn't a diff between the repo and the live machine config hash.");
            println!("Nothing to do.");
        }
    }
    Ok(())
}
