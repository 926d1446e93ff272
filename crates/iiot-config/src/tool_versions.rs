//! Pinned tool versions from `.tool-versions` (asdf format)

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Tool name to pinned version, parsed from `.tool-versions`.
///
/// Lines look like `talosctl 1.7.4` with optional `# comment` trailers;
/// blank lines and full-line comments are ignored. Only the first version
/// of a multi-version pin is kept.
#[derive(Debug, Clone)]
pub struct ToolVersions {
    path: PathBuf,
    pins: BTreeMap<String, String>,
}

impl ToolVersions {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Ok(Self::parse(path, &content))
    }

    fn parse(path: &Path, content: &str) -> Self {
        let mut pins = BTreeMap::new();
        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            if let (Some(tool), Some(version)) = (parts.next(), parts.next()) {
                pins.insert(tool.to_string(), version.to_string());
            }
        }
        Self {
            path: path.to_path_buf(),
            pins,
        }
    }

    pub fn get(&self, tool: &str) -> Option<&str> {
        self.pins.get(tool).map(String::as_str)
    }

    /// Version pin for `tool`, erroring when the tool is not listed
    pub fn require(&self, tool: &str) -> Result<&str> {
        self.get(tool).ok_or_else(|| Error::UnpinnedTool {
            tool: tool.to_string(),
            path: self.path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn parse(content: &str) -> ToolVersions {
        ToolVersions::parse(Path::new(".tool-versions"), content)
    }

    #[test]
    fn parses_simple_pins() {
        let versions = parse("talosctl 1.7.4\nkubectl 1.29.3\njq 1.7.1\n");
        assert_eq!(versions.get("talosctl"), Some("1.7.4"));
        assert_eq!(versions.get("kubectl"), Some("1.29.3"));
        assert_eq!(versions.get("jq"), Some("1.7.1"));
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let versions = parse(
            "# managed by the base repo\n\ntalosctl 1.7.4  # source: github releases\n",
        );
        assert_eq!(versions.get("talosctl"), Some("1.7.4"));
        assert_eq!(versions.get("#"), None);
    }

    #[test]
    fn keeps_first_of_multiple_versions() {
        let versions = parse("kubectl 1.29.3 1.28.0\n");
        assert_eq!(versions.get("kubectl"), Some("1.29.3"));
    }

    #[test]
    fn require_errors_for_unpinned_tool() {
        let versions = parse("jq 1.7.1\n");
        let err = versions.require("helm").unwrap_err();
        assert!(matches!(err, Error::UnpinnedTool { tool, .. } if tool == "helm"));
    }

    #[test]
    fn load_reads_from_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".tool-versions");
        fs::write(&path, "gpg 2.4.4\n").unwrap();

        let versions = ToolVersions::load(&path).unwrap();
        assert_eq!(versions.require("gpg").unwrap(), "2.4.4");
    }
}
