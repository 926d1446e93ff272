//! External binaries the machine workflows drive
//!
//! Every subprocess launch resolves its program name through this
//! struct, so tests can point the whole crate at stub scripts by
//! constructing a `Toolchain` with absolute paths.

/// Program names (or paths) of the required external tools
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub talosctl: String,
    pub jq: String,
    pub gpg: String,
    pub kubectl: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            talosctl: "talosctl".to_string(),
            jq: "jq".to_string(),
            gpg: "gpg".to_string(),
            kubectl: "kubectl".to_string(),
        }
    }
}
