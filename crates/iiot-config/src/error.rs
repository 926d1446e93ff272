//! Error types for iiot-config

use std::path::PathBuf;

/// Result type for iiot-config operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading project configuration
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {what} at {path}: {message}")]
    Parse {
        path: PathBuf,
        what: String,
        message: String,
    },

    #[error("No {marker} found in {start} or any parent directory")]
    RepoNotFound { marker: String, start: PathBuf },

    #[error("Project config invalid: {message}")]
    InvalidConfig { message: String },

    #[error("{tool} is not pinned in {path}")]
    UnpinnedTool { tool: String, path: PathBuf },

    #[error("Installer spec version {version} is not supported (expected {expected})")]
    UnsupportedSpecVersion { version: String, expected: String },

    #[error("Extension {name} is not defined in the installer spec")]
    UnknownExtension { name: String },

    #[error("No installer image provides exactly these extensions: {required:?}")]
    NoMatchingImage { required: Vec<String> },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, what: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            what: what.to_string(),
            message: message.into(),
        }
    }
}
