//! Timestamped backups of the live machine config
//!
//! A backup is taken right before an apply overwrites the live config,
//! so a bad patch can be rolled back by hand.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::document::MachineConfig;
use crate::error::{Error, Result};

/// Timestamp embedded in backup file names
const BACKUP_STAMP_FORMAT: &str = "%Y-%m-%d#%H:%M:%S";

/// Write `doc` to a timestamped variant of `target`, never overwriting.
///
/// `mc-backup.json` becomes `mc-backup(2024-05-01#12:30:00).json`; when
/// that name is already taken a counter is appended until a free name
/// is found. Returns the path actually written.
pub fn export_backup(doc: &MachineConfig, target: &Path) -> Result<PathBuf> {
    export_backup_at(doc, target, Local::now())
}

fn export_backup_at(doc: &MachineConfig, target: &Path, now: DateTime<Local>) -> Result<PathBuf> {
    let stamp = now.format(BACKUP_STAMP_FORMAT).to_string();
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, extension) = match name.split_once('.') {
        Some((stem, extension)) => (stem.to_string(), Some(extension.to_string())),
        None => (name, None),
    };

    let mut attempt = 1u32;
    loop {
        let candidate = dir.join(backup_name(&stem, extension.as_deref(), &stamp, attempt));
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(mut file) => {
                file.write_all(doc.as_bytes())?;
                tracing::debug!(path = %candidate.display(), "backed up live machine config");
                return Ok(candidate);
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(err) => return Err(Error::Io(err)),
        }
    }
}

fn backup_name(stem: &str, extension: Option<&str>, stamp: &str, attempt: u32) -> String {
    let counter = if attempt == 1 {
        String::new()
    } else {
        format!("-{attempt}")
    };
    match extension {
        Some(extension) => format!("{stem}({stamp}){counter}.{extension}"),
        None => format!("{stem}({stamp}){counter}"),
    }
}
