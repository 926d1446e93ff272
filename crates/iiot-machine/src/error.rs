//! Error types for machine lifecycle operations

use std::path::PathBuf;

use crate::plan::ApplyMode;

/// Result type alias for machine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while inspecting or changing a machine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// jq exited non-zero while applying a patch
    #[error("Can't apply the patch '{patch}': {stderr}")]
    PatchApplication { patch: PathBuf, stderr: String },

    /// A patch produced a config the validator rejects
    #[error("Machine config is not valid after patch '{patch}': {stderr}")]
    PatchValidation { patch: PathBuf, stderr: String },

    /// The validator rejected a config outside the patch pipeline
    #[error("Machine config is not valid: {stderr}")]
    Validation { stderr: String },

    /// Fetching the live machine config failed
    #[error("Can't fetch the machine config: {stderr}")]
    Fetch { stderr: String },

    /// The version probe output did not contain a client and a server tag
    #[error("Can't get the talos version from client and server: {output}")]
    VersionProbe { output: String },

    /// A live component version does not match the repo pin
    #[error("{component} version diff between repo ('{expected}') and live ('{live}'). Run this task with --force to ignore the version diff")]
    VersionMismatch {
        component: String,
        expected: String,
        live: String,
    },

    /// The live machine config no longer matches the sealed hash record
    #[error(
        "Diff between saved machine config hash and live machine config hash. \
         Run 'iiotctl seal-config' to explicitly overwrite the hash and seal the mc"
    )]
    HashDrift,

    /// Neither dry-run mode accepted the candidate config
    #[error("Can't apply the machine config in any mode. no-reboot: {no_reboot}; reboot: {reboot}")]
    Planning { no_reboot: String, reboot: String },

    /// Dry-run of the requested mode rejected the candidate config
    #[error("Can not apply the machine config in '{mode}' mode (via dry-run): {stderr}")]
    ModeRejected { mode: ApplyMode, stderr: String },

    /// Applying the config for real failed
    #[error("Can not apply the machine config in '{mode}' mode: {stderr}")]
    Apply { mode: ApplyMode, stderr: String },

    /// An apply mode string was not recognized
    #[error("Invalid apply mode '{mode}'. Valid modes: auto, interactive, staged, try, no-reboot, reboot")]
    InvalidApplyMode { mode: String },

    /// The machine address is not a valid IP
    #[error("'{given}' is not a valid IP address")]
    InvalidAddress { given: String },

    /// Patch discovery matched nothing
    #[error("No patch files found.")]
    NoPatchFiles,

    /// Refusing to overwrite an existing diff export
    #[error("Diff output {path} already exists")]
    DiffExists { path: PathBuf },

    /// Refusing to overwrite an existing output file without --force
    #[error("{what} ({path}) already exists. Delete the file or run the command with the '--force' flag")]
    OutputExists { what: String, path: PathBuf },

    /// External tool output did not have the expected structure
    #[error("Unexpected {what} structure: {message}")]
    UnexpectedShape { what: String, message: String },

    /// The api-server port-forward died before the upgrade could start
    #[error("Can't forward the api-server to your machine: {stderr}")]
    PortForward { stderr: String },

    /// The Kubernetes upgrade process exited non-zero
    #[error("The Kubernetes upgrade failed (exit code {exit_code:?})")]
    K8sUpgrade { exit_code: Option<i32> },

    /// Lock acquisition failed for a file
    #[error("Lock acquisition failed for {path}")]
    LockFailed { path: PathBuf },

    /// The home directory could not be determined
    #[error("Can't determine the home directory")]
    NoHomeDir,

    /// Process gateway errors
    #[error(transparent)]
    Proc(#[from] iiot_proc::Error),

    /// Repository configuration errors
    #[error(transparent)]
    Config(#[from] iiot_config::Error),

    /// IO errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON parse or serialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parse or serialization errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid glob pattern
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Unreadable path during glob expansion
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
}
