//! The machine config as an opaque canonical document
//!
//! A machine config is held as bytes in a canonical form: JSON with
//! alphabetically sorted keys, two-space indentation and no trailing
//! newline. Every ingress path (live fetch, patch output, generated
//! YAML) normalizes into this form, so byte equality is semantic
//! equality and a diff never shows formatting churn.
//!
//! The content is deliberately not modeled as typed structs. Talos
//! evolves its config schema faster than an ops tool should chase, so
//! anything that needs to look inside the document goes through jq,
//! the same tool the patches themselves use.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// A machine config in canonical JSON form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig(Vec<u8>);

impl MachineConfig {
    /// Canonicalize raw JSON bytes, e.g. jq output
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        Self::from_value(&value)
    }

    /// Unwrap a `talosctl get -o json` envelope and canonicalize its `spec`
    pub fn from_resource_envelope(bytes: &[u8]) -> Result<Self> {
        let envelope: serde_json::Value = serde_json::from_slice(bytes)?;
        let spec = envelope.get("spec").ok_or_else(|| Error::UnexpectedShape {
            what: "machineconfig resource".to_string(),
            message: "missing 'spec' field".to_string(),
        })?;
        Self::from_value(spec)
    }

    /// Canonicalize a YAML document, e.g. generated controlplane config
    pub fn from_yaml(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_yaml::from_slice(bytes)?;
        Self::from_value(&value)
    }

    fn from_value(value: &serde_json::Value) -> Result<Self> {
        // serde_json object maps are BTree-backed, so pretty-printing
        // yields sorted keys, matching what jq -S produces
        let text = serde_json::to_string_pretty(value)?;
        Ok(Self(text.into_bytes()))
    }

    /// The canonical bytes of the document
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The document as text, for diffing and display
    pub fn to_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    /// Hex-encoded SHA-256 digest of the canonical bytes
    pub fn sha256_hex(&self) -> String {
        format!("{:x}", Sha256::digest(&self.0))
    }
}
