//! First-boot provisioning of a blank machine
//!
//! Bootstrap is the only workflow that talks to a box without
//! credentials: it generates a fresh cluster config, runs the full
//! patch set including first-boot patches over it, applies the result
//! insecurely straight to the machine's IP, then seals it and records
//! the new machine CA in the repo's talosconfig so every later
//! workflow can reach the box through the tunnel.

use std::fs;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use iiot_config::InstallerSpec;
use serde_yaml::Value;

use crate::error::{Error, Result};
use crate::patch::discover_bootstrap_patches;
use crate::plan::ApplyMode;
use crate::seal::HashRecord;
use crate::sync::MachineSession;
use crate::talos::{ConnectionArgs, TalosClient};

/// Options for a bootstrap run
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub machine_ip: String,
    pub out_mc: Option<PathBuf>,
    pub out_talosconfig: Option<PathBuf>,
    pub dry_run: bool,
    pub force: bool,
}

/// How a bootstrap run ended
#[derive(Debug)]
pub enum BootstrapOutcome {
    /// Everything was generated and exported, nothing applied
    DryRun,
    /// The initial config is live and sealed
    Applied { sealed: HashRecord },
}

/// Provision a blank machine at `options.machine_ip`
pub fn run_bootstrap(session: &MachineSession, options: &BootstrapOptions) -> Result<BootstrapOutcome> {
    let ip: IpAddr = options
        .machine_ip
        .parse()
        .map_err(|_| Error::InvalidAddress {
            given: options.machine_ip.clone(),
        })?;

    for (what, path) in [
        ("Talosconfig", &options.out_talosconfig),
        ("Machine config", &options.out_mc),
    ] {
        if let Some(path) = path
            && path.exists()
            && !options.force
        {
            return Err(Error::OutputExists {
                what: what.to_string(),
                path: path.clone(),
            });
        }
    }

    let patches = discover_bootstrap_patches(session.layout().root())?;
    if patches.is_empty() {
        return Err(Error::NoPatchFiles);
    }

    let spec = InstallerSpec::load(&session.layout().installer_spec())?;
    let installer_image = spec.installer_image_ref(&session.config().talos_installed_extensions)?;

    let box_name = session.config().box_name.clone();
    let (blank, talosconfig) = session
        .client()
        .generate_config(&box_name, Some(&installer_image))?;

    if let Some(path) = &options.out_talosconfig {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let localized = localize_talosconfig(&talosconfig, &box_name, &ip.to_string())?;
        fs::write(path, localized)?;
        tracing::debug!(path = %path.display(), "exported local talosconfig");
    }

    let initial = session.engine().apply(&blank, &patches, true)?;

    if let Some(path) = &options.out_mc {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, initial.as_bytes())?;
        tracing::debug!(path = %path.display(), "exported initial machine config");
    }

    if options.dry_run {
        return Ok(BootstrapOutcome::DryRun);
    }

    // the machine has no credentials yet, so this single apply runs
    // against the plain IP instead of the usual tunnel routing
    let first_contact = TalosClient::new(
        session.toolchain(),
        ConnectionArgs::insecure_node(ip.to_string()),
    );
    first_contact.apply(&initial, ApplyMode::Auto)?;

    let sealed = session.ledger().seal(&initial)?;

    let ca = session.engine().machine_ca(&initial)?;
    record_machine_ca(&session.layout().project_talosconfig(), &box_name, &ca)?;

    Ok(BootstrapOutcome::Applied { sealed })
}

/// Point a generated talosconfig at the machine's bare IP and rename
/// its context so it cannot be confused with the tunnel-routed one.
fn localize_talosconfig(raw: &[u8], box_name: &str, ip: &str) -> Result<Vec<u8>> {
    let mut doc: Value = serde_yaml::from_slice(raw)?;
    let local_name = format!("{box_name}-local");

    let root = doc
        .as_mapping_mut()
        .ok_or_else(|| shape_error("not a mapping"))?;
    let contexts = root
        .get_mut("contexts")
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| shape_error("missing contexts"))?;
    let mut context = contexts
        .remove(box_name)
        .ok_or_else(|| shape_error(&format!("missing context '{box_name}'")))?;
    let fields = context
        .as_mapping_mut()
        .ok_or_else(|| shape_error("context is not a mapping"))?;
    let addresses = Value::Sequence(vec![Value::String(ip.to_string())]);
    fields.insert(Value::String("endpoints".to_string()), addresses.clone());
    fields.insert(Value::String("nodes".to_string()), addresses);
    contexts.insert(Value::String(local_name.clone()), context);
    root.insert(
        Value::String("context".to_string()),
        Value::String(local_name),
    );

    Ok(serde_yaml::to_string(&doc)?.into_bytes())
}

/// Store the machine CA of a freshly bootstrapped box in the repo's
/// tunnel talosconfig, which was committed before the box existed
fn record_machine_ca(path: &Path, box_name: &str, ca: &str) -> Result<()> {
    let raw = fs::read(path).map_err(|err| {
        if err.kind() == ErrorKind::NotFound {
            Error::UnexpectedShape {
                what: "project talosconfig".to_string(),
                message: format!("{} does not exist", path.display()),
            }
        } else {
            Error::Io(err)
        }
    })?;
    let mut doc: Value = serde_yaml::from_slice(&raw)?;
    let context = doc
        .get_mut("contexts")
        .and_then(|contexts| contexts.get_mut(box_name))
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| Error::UnexpectedShape {
            what: "project talosconfig".to_string(),
            message: format!("missing context '{box_name}'"),
        })?;
    context.insert(
        Value::String("ca".to_string()),
        Value::String(ca.to_string()),
    );
    fs::write(path, serde_yaml::to_string(&doc)?)?;
    Ok(())
}

fn shape_error(message: &str) -> Error {
    Error::UnexpectedShape {
        what: "generated talosconfig".to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const GENERATED: &str = "context: edge-box-01\ncontexts:\n  edge-box-01:\n    endpoints: []\n    ca: aWRlbnRpdHk=\n    crt: Y3J0\n    key: a2V5\n";

    #[test]
    fn localize_points_the_context_at_the_ip() {
        let localized =
            localize_talosconfig(GENERATED.as_bytes(), "edge-box-01", "192.168.1.50").unwrap();
        let doc: Value = serde_yaml::from_slice(&localized).unwrap();

        assert_eq!(
            doc.get("context").and_then(Value::as_str),
            Some("edge-box-01-local")
        );
        let context = doc
            .get("contexts")
            .and_then(|c| c.get("edge-box-01-local"))
            .unwrap();
        let nodes = context.get("nodes").and_then(Value::as_sequence).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].as_str(), Some("192.168.1.50"));
        let endpoints = context
            .get("endpoints")
            .and_then(Value::as_sequence)
            .unwrap();
        assert_eq!(endpoints[0].as_str(), Some("192.168.1.50"));
        // credentials survive the rename
        assert_eq!(context.get("crt").and_then(Value::as_str), Some("Y3J0"));
    }

    #[test]
    fn localize_rejects_a_config_without_the_context() {
        let err = localize_talosconfig(GENERATED.as_bytes(), "other-box", "10.0.0.1").unwrap_err();
        assert!(err.to_string().contains("missing context 'other-box'"));
    }

    #[test]
    fn record_machine_ca_updates_only_the_ca() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talosconfig-teleport");
        fs::write(
            &path,
            "context: edge-box-01\ncontexts:\n  edge-box-01:\n    endpoints:\n    - 127.0.0.1:51001\n    ca: b2xk\n",
        )
        .unwrap();

        record_machine_ca(&path, "edge-box-01", "bmV3Q2E=").unwrap();

        let doc: Value = serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let context = doc.get("contexts").and_then(|c| c.get("edge-box-01")).unwrap();
        assert_eq!(context.get("ca").and_then(Value::as_str), Some("bmV3Q2E="));
        let endpoints = context
            .get("endpoints")
            .and_then(Value::as_sequence)
            .unwrap();
        assert_eq!(endpoints[0].as_str(), Some("127.0.0.1:51001"));
    }

    #[test]
    fn record_machine_ca_requires_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = record_machine_ca(
            &dir.path().join("talosconfig-teleport"),
            "edge-box-01",
            "Y2E=",
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn bootstrap_rejects_invalid_addresses() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("iiotctl.json"),
            r#"{"box_name": "b", "talos_version": "1.7.4", "k8s_version": "1.29.0"}"#,
        )
        .unwrap();
        fs::write(dir.path().join(".tool-versions"), "talosctl 1.7.4\n").unwrap();
        let session = MachineSession::open(
            iiot_config::RepoLayout::new(dir.path()),
            crate::toolchain::Toolchain::default(),
            true,
        )
        .unwrap();
        let options = BootstrapOptions {
            machine_ip: "not-an-ip".to_string(),
            out_mc: None,
            out_talosconfig: None,
            dry_run: true,
            force: false,
        };
        let err = run_bootstrap(&session, &options).unwrap_err();
        assert!(matches!(err, Error::InvalidAddress { .. }));
    }

    #[test]
    fn bootstrap_refuses_existing_exports_without_force() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("iiotctl.json"),
            r#"{"box_name": "b", "talos_version": "1.7.4", "k8s_version": "1.29.0"}"#,
        )
        .unwrap();
        fs::write(dir.path().join(".tool-versions"), "talosctl 1.7.4\n").unwrap();
        let existing = dir.path().join("talosconfig");
        fs::write(&existing, "context: old\n").unwrap();
        let session = MachineSession::open(
            iiot_config::RepoLayout::new(dir.path()),
            crate::toolchain::Toolchain::default(),
            true,
        )
        .unwrap();
        let options = BootstrapOptions {
            machine_ip: "192.168.1.50".to_string(),
            out_mc: None,
            out_talosconfig: Some(existing.clone()),
            dry_run: true,
            force: false,
        };
        let err = run_bootstrap(&session, &options).unwrap_err();
        match err {
            Error::OutputExists { what, path } => {
                assert_eq!(what, "Talosconfig");
                assert_eq!(path, existing);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
