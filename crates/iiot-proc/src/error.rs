//! Error types for iiot-proc

use std::time::Duration;

/// Result type for iiot-proc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when running external tools
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The tool binary could not be started at all
    #[error("Failed to start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran and exited with a non-zero status
    #[error("{tool} failed (exit code {exit_code:?}): {stderr}")]
    Failed {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The tool did not finish within its deadline and was killed
    #[error("{tool} did not finish within {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    /// A required tool is not installed or not on PATH
    #[error("{tool} is not available. Have you installed {tool}?")]
    MissingDependency { tool: String },

    /// A required tool reports a version other than the pinned one
    #[error("{tool} version check failed: expected {expected}, probe output: {output}")]
    WrongVersion {
        tool: String,
        expected: String,
        output: String,
    },

    /// Standard I/O error while talking to a child process
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
