//! Unified diff between the live and candidate machine configs

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;

use similar::TextDiff;

use crate::document::MachineConfig;
use crate::error::{Error, Result};

/// Header names for the two sides of the diff
const LIVE_NAME: &str = "live-mc.json";
const REPO_NAME: &str = "repo-mc.json";

/// Unified diff from the live config to the candidate config.
///
/// Byte-identical documents yield an empty string; any semantic
/// difference yields a non-empty diff, since both sides are canonical.
pub fn unified_mc_diff(live: &MachineConfig, candidate: &MachineConfig) -> String {
    if live.as_bytes() == candidate.as_bytes() {
        return String::new();
    }
    let live_text = live.to_text();
    let candidate_text = candidate.to_text();
    TextDiff::from_lines(live_text.as_ref(), candidate_text.as_ref())
        .unified_diff()
        .context_radius(3)
        .header(LIVE_NAME, REPO_NAME)
        .to_string()
}

/// Export a diff to `path`, refusing to overwrite an existing file
pub fn write_diff_file(path: &Path, diff: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| {
            if source.kind() == ErrorKind::AlreadyExists {
                Error::DiffExists {
                    path: path.to_path_buf(),
                }
            } else {
                Error::Io(source)
            }
        })?;
    file.write_all(diff.as_bytes())?;
    Ok(())
}
