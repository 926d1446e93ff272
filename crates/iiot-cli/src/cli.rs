//! CLI argument parsing using clap derive

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use iiot_machine::DEFAULT_MACHINE_CONFIG_ID;

/// iiotctl - keep a Talos box in sync with its repository
#[derive(Parser, Debug)]
#[command(name = "iiotctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Check the current state of the live machine in comparison to this repo
    ///
    /// Examples:
    ///   iiotctl status                      # print the drift summary
    ///   iiotctl status --out-diff mc.diff   # also export the config diff
    Status {
        /// Output file path for machine config diffs
        #[arg(long)]
        out_diff: Option<PathBuf>,

        /// Use the currently selected talos context instead of the repo talosconfig
        #[arg(short = 'u', long)]
        use_current_context: bool,
    },

    /// Sync the machine with the config from this repo
    ///
    /// Shows the drift summary first, then asks before applying anything.
    ///
    /// Examples:
    ///   iiotctl sync                        # review and apply interactively
    ///   iiotctl sync --dry-run              # stop after the feasibility probe
    ///   iiotctl sync --apply-mode reboot    # apply and reboot the box
    Sync {
        /// Output file path for machine config diffs
        #[arg(long)]
        out_diff: Option<PathBuf>,

        /// Sync without applying the new config
        #[arg(short = 'd', long)]
        dry_run: bool,

        /// Mode for applying the machine config (auto, interactive, staged, try, no-reboot, reboot)
        #[arg(short = 'a', long, default_value = "no-reboot")]
        apply_mode: String,

        /// Use the currently selected talos context instead of the repo talosconfig
        #[arg(short = 'u', long)]
        use_current_context: bool,

        /// Output file path to save the live machine config at before applying
        #[arg(long, default_value = ".tasks/mc-backup.json")]
        out_backup: PathBuf,

        /// Ignore version conflicts for talos and k8s between repo and live machine
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Seal the live machine config and save it in the repo
    SealConfig {
        /// Id of the machine config on the live machine
        #[arg(long, default_value = DEFAULT_MACHINE_CONFIG_ID)]
        id: String,

        /// Use the currently selected talos context instead of the repo talosconfig
        #[arg(short = 'u', long)]
        use_current_context: bool,
    },

    /// Fetch a current machine config by id from the live machine
    FetchConfig {
        /// Id of the machine config on the live machine
        #[arg(long, default_value = DEFAULT_MACHINE_CONFIG_ID)]
        id: String,

        /// Use the currently selected talos context instead of the repo talosconfig
        #[arg(short = 'u', long)]
        use_current_context: bool,
    },

    /// Patch a machine config with the repo's jq patch files
    ///
    /// The config to patch comes from stdin unless --fetch or --generate
    /// is given. The patched config is printed to stdout.
    ///
    /// Examples:
    ///   iiotctl patch-config --fetch > mc.json
    ///   iiotctl patch-config --generate > mc.json
    ///   cat mc.json | iiotctl patch-config -p "machine/config/*/_*.jq"
    PatchConfig {
        /// Fetch the live machine config before patching it
        #[arg(short = 'f', long)]
        fetch: bool,

        /// Generate a blank machine config instead of fetching one
        #[arg(short = 'g', long)]
        generate: bool,

        /// Glob pattern(s) to find the local patch files to patch with
        #[arg(short = 'p', long = "patch-file-pattern")]
        patch_file_pattern: Vec<String>,

        /// Id of the machine config on the live machine
        #[arg(long, default_value = DEFAULT_MACHINE_CONFIG_ID)]
        id: String,

        /// Use the currently selected talos context instead of the repo talosconfig
        #[arg(short = 'u', long)]
        use_current_context: bool,
    },

    /// Bootstrap a new machine with the talos machine config from the repo
    ///
    /// Examples:
    ///   iiotctl bootstrap 192.168.23.2                  # generate and apply
    ///   iiotctl bootstrap 192.168.23.2 --dry-run        # generate only
    ///   iiotctl bootstrap 192.168.23.2 --out-mc mc.json # also export the config
    Bootstrap {
        /// IP address of the box which should be bootstrapped
        machine_ip: String,

        /// Output file path for the generated machine config
        #[arg(long)]
        out_mc: Option<PathBuf>,

        /// Output file path for the localized talosconfig
        #[arg(long, default_value = ".tasks/talosconfig")]
        out_talosconfig: PathBuf,

        /// Bootstrap without applying to the machine
        #[arg(short = 'd', long)]
        dry_run: bool,

        /// Overwrite the output files when they already exist
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Upgrade talos to the version which is specified in the repo
    UpgradeTalos {
        /// Don't preserve data on disk
        #[arg(long)]
        no_preserve: bool,

        /// Don't stage the upgrade to perform it after a reboot
        #[arg(long)]
        no_stage: bool,

        /// Use the currently selected talos context instead of the repo talosconfig
        #[arg(short = 'u', long)]
        use_current_context: bool,
    },

    /// Upgrade k8s to the version which is specified in the repo
    UpgradeK8s {
        /// Execute the upgrade in dry-run mode
        #[arg(short = 'd', long)]
        dry_run: bool,

        /// Pre-pull the k8s images onto the live machine before updating
        #[arg(long)]
        preload: bool,

        /// Use the currently selected talos and k8s contexts instead of the repo ones
        #[arg(short = 'u', long)]
        use_current_context: bool,
    },
}
