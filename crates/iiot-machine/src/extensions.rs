//! Live vs repo system-extension comparison

use std::collections::{BTreeMap, BTreeSet};

/// One extension's repo pin next to what runs live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRow {
    pub name: String,
    pub repo: Option<String>,
    pub live: Option<String>,
}

impl ExtensionRow {
    /// Synced means present on both sides with the same version
    pub fn synced(&self) -> bool {
        match (&self.repo, &self.live) {
            (Some(repo), Some(live)) => repo == live,
            _ => false,
        }
    }
}

/// Comparison of the repo-pinned and live extension sets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionComparison {
    repo: BTreeMap<String, String>,
    live: BTreeMap<String, String>,
}

impl ExtensionComparison {
    pub fn new(repo: BTreeMap<String, String>, live: BTreeMap<String, String>) -> Self {
        Self { repo, live }
    }

    /// True when both sides carry exactly the same versions
    pub fn in_sync(&self) -> bool {
        self.repo == self.live
    }

    /// One row per extension name on either side, in name order
    pub fn rows(&self) -> Vec<ExtensionRow> {
        let names: BTreeSet<&String> = self.repo.keys().chain(self.live.keys()).collect();
        names
            .into_iter()
            .map(|name| ExtensionRow {
                name: name.clone(),
                repo: self.repo.get(name).cloned(),
                live: self.live.get(name).cloned(),
            })
            .collect()
    }
}
