//! Installer image spec (`machine/installer-images.yaml`)
//!
//! The spec file lists every system extension the project pins and the
//! prebuilt installer images baked from subsets of them. Sync and the
//! talos upgrade flow resolve versions and the image reference from here.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

const SUPPORTED_SCHEMA: &str = "v1";

#[derive(Debug, Clone, Deserialize)]
pub struct InstallerSpec {
    pub version: String,
    pub metadata: InstallerMetadata,
    #[serde(default)]
    pub extensions: Vec<ExtensionSpec>,
    #[serde(default)]
    pub images: Vec<ImageSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstallerMetadata {
    pub name: String,
    pub revision: u32,
    pub talos_version: String,
    pub installer_image_repo: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtensionSpec {
    pub name: String,
    pub version: String,
    pub image_repo: String,
    pub image_tag: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageSpec {
    pub id: u32,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl InstallerSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let spec: Self = serde_yaml::from_str(&content)
            .map_err(|e| Error::parse(path, "installer spec", e.to_string()))?;
        if spec.version != SUPPORTED_SCHEMA {
            return Err(Error::UnsupportedSpecVersion {
                version: spec.version,
                expected: SUPPORTED_SCHEMA.to_string(),
            });
        }
        Ok(spec)
    }

    /// Pinned versions of the required extensions, keyed by name.
    ///
    /// A required extension that the spec does not define is an error.
    pub fn extension_versions(&self, required: &[String]) -> Result<BTreeMap<String, String>> {
        let known: BTreeMap<&str, &str> = self
            .extensions
            .iter()
            .map(|ext| (ext.name.as_str(), ext.version.as_str()))
            .collect();

        let mut versions = BTreeMap::new();
        for name in required {
            let version = known.get(name.as_str()).ok_or_else(|| Error::UnknownExtension {
                name: name.clone(),
            })?;
            versions.insert(name.clone(), (*version).to_string());
        }
        Ok(versions)
    }

    /// Full image reference of the installer baked with exactly the
    /// required extensions: `{repo}:{talos_version}-{revision}-{image_id}`.
    pub fn installer_image_ref(&self, required: &[String]) -> Result<String> {
        let wanted: BTreeSet<&str> = required.iter().map(String::as_str).collect();
        for image in &self.images {
            let baked: BTreeSet<&str> = image.extensions.iter().map(String::as_str).collect();
            if baked == wanted {
                return Ok(format!(
                    "{}:{}-{}-{}",
                    self.metadata.installer_image_repo,
                    self.metadata.talos_version,
                    self.metadata.revision,
                    image.id
                ));
            }
        }
        Err(Error::NoMatchingImage {
            required: required.to_vec(),
        })
    }
}
