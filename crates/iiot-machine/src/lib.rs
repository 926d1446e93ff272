//! Machine lifecycle layer for iiotctl
//!
//! Everything that inspects or changes a Talos machine lives here:
//!
//! - **Document model**: the machine config as opaque canonical JSON
//! - **Patch pipeline**: ordered jq patches with per-step validation
//! - **Planning**: dry-run probes that pick the least disruptive apply mode
//! - **Seal ledger**: encrypted config archive plus hash drift detection
//! - **Workflows**: status, sync, bootstrap and the two upgrades
//!
//! # Architecture
//!
//! `iiot-machine` sits above the Layer 0 crates and below the CLI:
//!
//! ```text
//!            iiot-cli
//!                |
//!          iiot-machine
//!                |
//!        +-------+-------+
//!        |               |
//!    iiot-proc      iiot-config
//! ```
//!
//! All machine state is read and written through external tools
//! (talosctl, jq, gpg, kubectl); this crate supplies the sequencing,
//! the guard rails and the local bookkeeping around them.

pub mod backup;
pub mod bootstrap;
pub mod diff;
pub mod document;
pub mod error;
pub mod extensions;
pub mod patch;
pub mod plan;
pub mod seal;
pub mod sync;
pub mod talos;
pub mod toolchain;
pub mod upgrade;

pub use backup::export_backup;
pub use bootstrap::{run_bootstrap, BootstrapOptions, BootstrapOutcome};
pub use diff::{unified_mc_diff, write_diff_file};
pub use document::MachineConfig;
pub use error::{Error, Result};
pub use extensions::{ExtensionComparison, ExtensionRow};
pub use patch::{discover_patches, discover_sync_patches, PatchEngine, PatchFile};
pub use plan::{plan_apply, ApplyMode, ApplyPlan};
pub use seal::{HashRecord, SealedLedger, SEAL_KEY_ID};
pub use sync::{
    MachineReport, MachineSession, PatchSource, RequiredTool, SealOutcome,
};
pub use talos::{ConnectionArgs, TalosClient, TalosUpgradeArgs, DEFAULT_MACHINE_CONFIG_ID};
pub use toolchain::Toolchain;
pub use upgrade::{
    current_kube_context, talos_upgrade_overview, upgrade_k8s, upgrade_talos, K8sUpgradeArgs,
    UpgradeOverview,
};
