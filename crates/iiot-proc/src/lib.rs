//! External tool execution for iiotctl
//!
//! Every interaction with an external binary (talosctl, jq, gpg, kubectl,
//! ...) goes through this crate: commands are built with [`ToolCommand`],
//! run synchronously, and reported as structured results instead of raw
//! exit codes scattered through the callers.

pub mod check;
pub mod command;
pub mod error;

pub use check::{ToolCheck, preflight};
pub use command::{ToolCommand, ToolOutput};
pub use error::{Error, Result};
