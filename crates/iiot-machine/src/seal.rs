//! Sealed config archive and hash ledger
//!
//! After every successful apply the machine config is encrypted to the
//! repo's public keyring and its SHA-256 digest is recorded next to
//! it. The digest is the tamper line: when the live config stops
//! matching it, somebody changed the machine outside of a sync, and
//! the workflows refuse to continue until the operator re-seals
//! deliberately.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use fs2::FileExt;
use iiot_config::RepoLayout;
use iiot_proc::ToolCommand;

use crate::document::MachineConfig;
use crate::error::{Error, Result};
use crate::toolchain::Toolchain;

/// Fingerprint of the operations key every sealed config is encrypted to
pub const SEAL_KEY_ID: &str = "CE5C2A48F2FD3B6F748F39D35C573EF25CB0F87E";

/// Timestamp format of the hash record's second line
const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One recorded seal: digest plus when it was taken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRecord {
    pub digest: String,
    pub created_at: String,
}

impl HashRecord {
    /// Render the two-line on-disk form
    fn render(&self) -> String {
        format!("{}\nCreated at: {}", self.digest, self.created_at)
    }
}

/// The seal state of one repository
#[derive(Debug, Clone)]
pub struct SealedLedger {
    gpg: String,
    hash_file: PathBuf,
    sealed_file: PathBuf,
    public_key_file: PathBuf,
    recipient: String,
}

impl SealedLedger {
    pub fn new(toolchain: &Toolchain, layout: &RepoLayout) -> Self {
        Self {
            gpg: toolchain.gpg.clone(),
            hash_file: layout.hash_file(),
            sealed_file: layout.sealed_file(),
            public_key_file: layout.public_key_file(),
            recipient: SEAL_KEY_ID.to_string(),
        }
    }

    /// The digest recorded by the last seal, if any.
    ///
    /// A missing or empty record reads as "never sealed", which makes
    /// every live config stale until the first seal.
    pub fn recorded_digest(&self) -> Option<String> {
        let content = fs::read_to_string(&self.hash_file).ok()?;
        content
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|digest| !digest.is_empty())
    }

    /// True when the recorded digest no longer matches `doc`
    pub fn is_stale(&self, doc: &MachineConfig) -> bool {
        self.recorded_digest().as_deref() != Some(doc.sha256_hex().as_str())
    }

    /// Encrypt `doc` into the sealed archive and update the hash record.
    ///
    /// The previous archive is removed first because gpg refuses to
    /// overwrite its output file. The record itself is written via
    /// temp file and rename so a crash never leaves a torn digest.
    pub fn seal(&self, doc: &MachineConfig) -> Result<HashRecord> {
        match fs::remove_file(&self.sealed_file) {
            Err(err) if err.kind() != ErrorKind::NotFound => return Err(Error::Io(err)),
            _ => {}
        }
        if let Some(parent) = self.sealed_file.parent() {
            fs::create_dir_all(parent)?;
        }

        ToolCommand::new(&self.gpg)
            .args(["--no-default-keyring", "--primary-keyring"])
            .arg(self.public_key_file.to_string_lossy())
            .args(["--encrypt", "--recipient", &self.recipient, "-o"])
            .arg(self.sealed_file.to_string_lossy())
            .args(["--trust-model", "always", "--armor", "--batch"])
            .stdin_bytes(doc.as_bytes().to_vec())
            .output()?;

        let record = HashRecord {
            digest: doc.sha256_hex(),
            created_at: Local::now().format(CREATED_AT_FORMAT).to_string(),
        };
        write_atomic(&self.hash_file, record.render().as_bytes())?;
        tracing::debug!(digest = %record.digest, "sealed machine config");
        Ok(record)
    }
}

/// Write a file via temp file + rename, locking the temp during the write
fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

    let mut temp_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    temp_file.lock_exclusive().map_err(|_| Error::LockFailed {
        path: path.to_path_buf(),
    })?;
    temp_file.write_all(content)?;
    temp_file.sync_all()?;
    let _ = FileExt::unlock(&temp_file);

    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use pretty_assertions::assert_eq;

    use super::*;

    /// Stub gpg that writes a recognizable armor around its stdin
    fn stub_gpg(dir: &Path) -> Toolchain {
        let gpg = dir.join("gpg");
        fs::write(
            &gpg,
            "#!/bin/sh\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-o\" ]; then out=\"$2\"; shift; fi\n  shift\ndone\necho '-----BEGIN PGP MESSAGE-----' > \"$out\"\ncat >> \"$out\"\necho '-----END PGP MESSAGE-----' >> \"$out\"\n",
        )
        .unwrap();
        fs::set_permissions(&gpg, fs::Permissions::from_mode(0o755)).unwrap();
        Toolchain {
            gpg: gpg.to_string_lossy().into_owned(),
            ..Toolchain::default()
        }
    }

    fn ledger_in(dir: &Path) -> SealedLedger {
        let layout = RepoLayout::new(dir);
        SealedLedger::new(&stub_gpg(dir), &layout)
    }

    #[test]
    fn unsealed_repo_is_always_stale() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(dir.path());
        let doc = MachineConfig::from_json(b"{\"a\": 1}").unwrap();
        assert_eq!(ledger.recorded_digest(), None);
        assert!(ledger.is_stale(&doc));
    }

    #[test]
    fn seal_records_digest_and_archives_the_config() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(dir.path());
        let doc = MachineConfig::from_json(b"{\"a\": 1}").unwrap();

        let record = ledger.seal(&doc).unwrap();
        assert_eq!(record.digest, doc.sha256_hex());
        assert!(!ledger.is_stale(&doc));

        let sealed = fs::read_to_string(dir.path().join("machine/config-sealed/config-sealed.asc"))
            .unwrap();
        assert!(sealed.starts_with("-----BEGIN PGP MESSAGE-----"));
        assert!(sealed.contains("\"a\": 1"));

        let hash = fs::read_to_string(dir.path().join("machine/config-sealed/config.hash")).unwrap();
        let mut lines = hash.lines();
        assert_eq!(lines.next(), Some(record.digest.as_str()));
        assert!(lines.next().unwrap_or_default().starts_with("Created at: "));
    }

    #[test]
    fn changed_config_goes_stale_until_resealed() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(dir.path());
        let first = MachineConfig::from_json(b"{\"a\": 1}").unwrap();
        let second = MachineConfig::from_json(b"{\"a\": 2}").unwrap();

        ledger.seal(&first).unwrap();
        assert!(ledger.is_stale(&second));
        ledger.seal(&second).unwrap();
        assert!(!ledger.is_stale(&second));
        assert!(ledger.is_stale(&first));
    }

    #[test]
    fn reseal_replaces_the_previous_archive() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(dir.path());
        let first = MachineConfig::from_json(b"{\"n\": 1}").unwrap();
        let second = MachineConfig::from_json(b"{\"n\": 2}").unwrap();

        ledger.seal(&first).unwrap();
        ledger.seal(&second).unwrap();
        let sealed = fs::read_to_string(dir.path().join("machine/config-sealed/config-sealed.asc"))
            .unwrap();
        assert!(sealed.contains("\"n\": 2"));
        assert!(!sealed.contains("\"n\": 1"));
    }

    #[test]
    fn empty_hash_record_reads_as_unsealed() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_in(dir.path());
        fs::create_dir_all(dir.path().join("machine/config-sealed")).unwrap();
        fs::write(dir.path().join("machine/config-sealed/config.hash"), "\n").unwrap();
        assert_eq!(ledger.recorded_digest(), None);
    }
}
