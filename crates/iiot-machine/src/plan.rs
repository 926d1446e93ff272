//! Apply-mode planning
//!
//! Before a changed config is offered for apply, both non-disruptive
//! and disruptive modes are dry-run against the live machine. The
//! plan records the least disruptive mode that works, so the operator
//! learns up front whether a reboot is coming.

use std::fmt;
use std::str::FromStr;

use crate::document::MachineConfig;
use crate::error::{Error, Result};
use crate::talos::TalosClient;

/// Modes accepted by `talosctl apply-config --mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    Auto,
    Interactive,
    Staged,
    Try,
    NoReboot,
    Reboot,
}

impl ApplyMode {
    /// All mode names in their wire form
    pub fn all_names() -> &'static [&'static str] {
        &["auto", "interactive", "staged", "try", "no-reboot", "reboot"]
    }
}

impl fmt::Display for ApplyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApplyMode::Auto => "auto",
            ApplyMode::Interactive => "interactive",
            ApplyMode::Staged => "staged",
            ApplyMode::Try => "try",
            ApplyMode::NoReboot => "no-reboot",
            ApplyMode::Reboot => "reboot",
        };
        write!(f, "{name}")
    }
}

impl FromStr for ApplyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(ApplyMode::Auto),
            "interactive" => Ok(ApplyMode::Interactive),
            "staged" => Ok(ApplyMode::Staged),
            "try" => Ok(ApplyMode::Try),
            "no-reboot" => Ok(ApplyMode::NoReboot),
            "reboot" => Ok(ApplyMode::Reboot),
            other => Err(Error::InvalidApplyMode {
                mode: other.to_string(),
            }),
        }
    }
}

/// The least disruptive way a pending change can be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyPlan {
    /// The change applies without interrupting the machine
    NoReboot,
    /// Only a reboot accepts the change; keeps the no-reboot rejection
    Reboot { no_reboot_stderr: String },
}

impl ApplyPlan {
    /// The mode this plan would apply with
    pub fn mode(&self) -> ApplyMode {
        match self {
            ApplyPlan::NoReboot => ApplyMode::NoReboot,
            ApplyPlan::Reboot { .. } => ApplyMode::Reboot,
        }
    }
}

/// Probe how `candidate` can be applied: no-reboot first, then reboot.
///
/// Errors with both rejection texts when neither mode works.
pub fn plan_apply(client: &TalosClient, candidate: &MachineConfig) -> Result<ApplyPlan> {
    let no_reboot = client.probe_apply(candidate, ApplyMode::NoReboot)?;
    if no_reboot.feasible {
        return Ok(ApplyPlan::NoReboot);
    }
    tracing::debug!(stderr = %no_reboot.stderr, "no-reboot apply rejected, trying reboot");
    let reboot = client.probe_apply(candidate, ApplyMode::Reboot)?;
    if reboot.feasible {
        return Ok(ApplyPlan::Reboot {
            no_reboot_stderr: no_reboot.stderr,
        });
    }
    Err(Error::Planning {
        no_reboot: no_reboot.stderr,
        reboot: reboot.stderr,
    })
}
