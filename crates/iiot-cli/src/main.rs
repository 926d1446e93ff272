//! iiotctl
//!
//! The command-line interface for keeping a Talos box in sync with its
//! repository.

mod cli;
mod commands;
mod error;

use clap::Parser;
use colored::Colorize;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use cli::{Cli, Commands};
use commands::SyncOptions;
use error::Result;

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing if verbose. Logs go to stderr: fetch-config and
    // patch-config emit the machine config on stdout for piping.
    if cli.verbose {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .with_target(true)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
        tracing::debug!("Verbose mode enabled");
    }

    execute_command(cli.command, cli.verbose)
}

fn execute_command(cmd: Commands, verbose: bool) -> Result<()> {
    match cmd {
        Commands::Status {
            out_diff,
            use_current_context,
        } => commands::run_status(out_diff.as_deref(), use_current_context),
        Commands::Sync {
            out_diff,
            dry_run,
            apply_mode,
            use_current_context,
            out_backup,
            force,
        } => commands::run_sync(&SyncOptions {
            out_diff,
            out_backup,
            apply_mode,
            dry_run,
            use_current_context,
            force,
        }),
        Commands::SealConfig {
            id,
            use_current_context,
        } => commands::run_seal_config(&id, use_current_context),
        Commands::FetchConfig {
            id,
            use_current_context,
        } => commands::run_fetch_config(&id, use_current_context),
        Commands::PatchConfig {
            fetch,
            generate,
            patch_file_pattern,
            id,
            use_current_context,
        } => commands::run_patch_config(fetch, generate, &patch_file_pattern, &id, use_current_context),
        Commands::Bootstrap {
            machine_ip,
            out_mc,
            out_talosconfig,
            dry_run,
            force,
        } => commands::run_bootstrap(&machine_ip, out_mc.as_deref(), &out_talosconfig, dry_run, force),
        Commands::UpgradeTalos {
            no_preserve,
            no_stage,
            use_current_context,
        } => commands::run_upgrade_talos(no_preserve, no_stage, verbose, use_current_context),
        Commands::UpgradeK8s {
            dry_run,
            preload,
            use_current_context,
        } => commands::run_upgrade_k8s(dry_run, preload, use_current_context),
    }
}
