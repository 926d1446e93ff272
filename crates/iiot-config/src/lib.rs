//! Static configuration for iiotctl
//!
//! Loads the per-box project file (`iiotctl.json`), the pinned tool
//! versions (`.tool-versions`) and the installer image spec
//! (`machine/installer-images.yaml`), and resolves the repository layout
//! all other crates take their paths from.

pub mod error;
pub mod installer;
pub mod layout;
pub mod project;
pub mod tool_versions;

pub use error::{Error, Result};
pub use installer::InstallerSpec;
pub use layout::RepoLayout;
pub use project::ProjectConfig;
pub use tool_versions::ToolVersions;
