//! Mission-based integration tests
//!
//! Each mission replays one operator workflow end to end across the
//! library crates, with the live machine simulated by a scripted
//! toolchain. The CLI layer is exercised separately by the e2e tests
//! next to the binary; here the focus is the crate seams: config
//! loading, tool gating, the patch pipeline and the seal ledger.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use iiot_config::RepoLayout;
use iiot_machine::{
    run_bootstrap, talos_upgrade_overview, BootstrapOptions, BootstrapOutcome, Error,
    MachineSession, PatchSource, RequiredTool, SealOutcome, Toolchain, DEFAULT_MACHINE_CONFIG_ID,
};
use pretty_assertions::assert_eq;
use serde_yaml::Value;

// =============================================================================
// Test Infrastructure
// =============================================================================

/// One box repository checkout with a scripted toolchain.
///
/// The machine side lives in `.state`: `live-mc.json` is what the stub
/// talosctl serves as the machine config, `extensions.json` what it
/// reports as installed extensions, and every invocation is appended
/// to `calls.log`.
struct BoxRepo {
    root: tempfile::TempDir,
    state: PathBuf,
    toolchain: Toolchain,
}

impl BoxRepo {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let state = root.path().join(".state");
        fs::create_dir_all(&state).unwrap();

        fs::write(
            root.path().join("iiotctl.json"),
            r#"{
                "box_name": "edge-box-01",
                "talos_version": "1.7.4",
                "k8s_version": "1.29.0",
                "talos_installed_extensions": ["iscsi-tools"]
            }"#,
        )
        .unwrap();
        fs::write(
            root.path().join(".tool-versions"),
            "talosctl 1.7.4\njq 1.7.1\nkubectl 1.29.0\n",
        )
        .unwrap();
        fs::create_dir_all(root.path().join("machine/jq-utils")).unwrap();
        fs::write(
            root.path().join("machine/installer-images.yaml"),
            "version: v1\n\
             metadata:\n\
             \x20 name: edge-box-01\n\
             \x20 revision: 3\n\
             \x20 talos_version: 1.7.4\n\
             \x20 installer_image_repo: ghcr.io/example/installer\n\
             extensions:\n\
             \x20 - name: iscsi-tools\n\
             \x20   version: v0.1.4\n\
             \x20   image_repo: ghcr.io/siderolabs/iscsi-tools\n\
             \x20   image_tag: v0.1.4\n\
             images:\n\
             \x20 - id: 1\n\
             \x20   extensions:\n\
             \x20     - iscsi-tools\n",
        )
        .unwrap();
        fs::write(
            root.path().join("machine/talosconfig-teleport"),
            "context: edge-box-01\n\
             contexts:\n\
             \x20 edge-box-01:\n\
             \x20   endpoints:\n\
             \x20   - 127.0.0.1:51001\n\
             \x20   ca: b2xk\n",
        )
        .unwrap();

        fs::write(state.join("live-mc.json"), "{\"a\": 1}").unwrap();
        fs::write(
            state.join("extensions.json"),
            r#"{"spec": {"metadata": {"name": "iscsi-tools", "version": "v0.1.4", "author": "Sidero Labs"}}}"#,
        )
        .unwrap();

        // one first-boot patch and one sync patch; both are shell
        // scripts because the stub jq executes -f targets with sh
        let base = root.path().join("machine/config/base");
        fs::create_dir_all(&base).unwrap();
        fs::write(
            base.join("_05-seed.boot.jq"),
            "#!/bin/sh\ncat >/dev/null\necho '{\"a\": 1}'\n",
        )
        .unwrap();
        fs::write(
            base.join("_10-add-b.jq"),
            "#!/bin/sh\ncat >/dev/null\necho '{\"a\": 1, \"b\": 2}'\n",
        )
        .unwrap();

        let toolchain = Toolchain {
            talosctl: write_talosctl_stub(root.path(), &state),
            jq: write_jq_stub(root.path()),
            gpg: write_gpg_stub(root.path()),
            kubectl: "kubectl".to_string(),
        };

        Self {
            root,
            state,
            toolchain,
        }
    }

    fn session(&self) -> MachineSession {
        MachineSession::open(
            RepoLayout::new(self.root.path()),
            self.toolchain.clone(),
            true,
        )
        .unwrap()
    }

    fn set_live(&self, json: &str) {
        fs::write(self.state.join("live-mc.json"), json).unwrap();
    }

    fn set_live_extension(&self, name: &str, version: &str) {
        fs::write(
            self.state.join("extensions.json"),
            format!(
                r#"{{"spec": {{"metadata": {{"name": "{name}", "version": "{version}", "author": "Sidero Labs"}}}}}}"#
            ),
        )
        .unwrap();
    }

    fn calls(&self) -> String {
        fs::read_to_string(self.state.join("calls.log")).unwrap_or_default()
    }

    fn teleport_config(&self) -> Value {
        let raw = fs::read(self.root.path().join("machine/talosconfig-teleport")).unwrap();
        serde_yaml::from_slice(&raw).unwrap()
    }
}

fn write_executable(path: &Path, content: &str) -> String {
    fs::write(path, content).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn write_talosctl_stub(dir: &Path, state: &Path) -> String {
    let script = format!(
        r#"#!/bin/sh
STATE="{state}"
echo "talosctl $@" >> "$STATE/calls.log"
case "$1" in
  version)
    if [ "$2" = "--client" ]; then
      printf 'Client:\n\tTag:         v1.7.4\n'
    else
      printf 'Client:\n\tTag:         v1.7.4\nServer:\n\tNODE: 10.0.0.5\n\tTag:         v1.7.4\n'
    fi
    ;;
  get)
    case "$2" in
      mc) printf '{{"spec": %s}}\n' "$(cat "$STATE/live-mc.json")" ;;
      nodename) echo '{{"spec": {{"nodename": "edge-box-01"}}}}' ;;
      extensions) cat "$STATE/extensions.json" ;;
    esac
    ;;
  validate)
    exit 0
    ;;
  gen)
    out=""; image="none"; prev=""
    for a in "$@"; do
      [ "$prev" = "--output-dir" ] && out="$a"
      case "$a" in --install-image=*) image="${{a#--install-image=}}" ;; esac
      prev="$a"
    done
    printf 'machine:\n  ca:\n    crt: R0VOLUNB\n  install:\n    image: %s\n  kubelet:\n    image: ghcr.io/siderolabs/kubelet:v1.29.0\n' "$image" > "$out/controlplane.yaml"
    printf 'context: edge-box-01\ncontexts:\n  edge-box-01:\n    endpoints: []\n    ca: R0VOLUNB\n    crt: Y2xpZW50\n    key: a2V5\n' > "$out/talosconfig"
    ;;
  apply-config)
    file=""; dry=0; prev=""
    for a in "$@"; do
      [ "$prev" = "--file" ] && file="$a"
      [ "$a" = "--dry-run" ] && dry=1
      prev="$a"
    done
    if [ "$dry" = "0" ]; then
      cp "$file" "$STATE/applied-mc.json"
    fi
    ;;
esac
"#,
        state = state.display()
    );
    write_executable(&dir.join(".stub-talosctl"), &script)
}

fn write_jq_stub(dir: &Path) -> String {
    let script = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "jq-1.7.1"
  exit 0
fi
patch=""; prev=""
for a in "$@"; do
  [ "$prev" = "-f" ] && patch="$a"
  prev="$a"
done
if [ -n "$patch" ]; then
  exec sh "$patch"
fi
filter="$2"
cat >/dev/null
case "$filter" in
  *machine.ca*) echo "R0VOLUNB" ;;
  *) echo "1.29.0" ;;
esac
"#;
    write_executable(&dir.join(".stub-jq"), script)
}

fn write_gpg_stub(dir: &Path) -> String {
    let script = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "gpg (GnuPG) 2.4.4"
  exit 0
fi
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; shift; fi
  shift
done
echo '-----BEGIN PGP MESSAGE-----' > "$out"
cat >> "$out"
echo '-----END PGP MESSAGE-----' >> "$out"
"#;
    write_executable(&dir.join(".stub-gpg"), script)
}

// =============================================================================
// Mission: provision a blank machine
// =============================================================================

#[test]
fn bootstrap_dry_run_exports_without_touching_the_machine() {
    let repo = BoxRepo::new();
    let session = repo.session();
    let out_mc = repo.root.path().join(".tasks/mc-bootstrap.json");
    let out_talosconfig = repo.root.path().join(".tasks/talosconfig");

    let outcome = run_bootstrap(
        &session,
        &BootstrapOptions {
            machine_ip: "192.168.1.50".to_string(),
            out_mc: Some(out_mc.clone()),
            out_talosconfig: Some(out_talosconfig.clone()),
            dry_run: true,
            force: false,
        },
    )
    .unwrap();
    assert!(matches!(outcome, BootstrapOutcome::DryRun));

    // the generated config was pointed at the installer image baked
    // with exactly the repo's extension set
    assert!(repo
        .calls()
        .contains("--install-image=ghcr.io/example/installer:1.7.4-3-1"));

    // the exported talosconfig is localized to the bare IP
    let doc: Value = serde_yaml::from_slice(&fs::read(&out_talosconfig).unwrap()).unwrap();
    assert_eq!(
        doc.get("context").and_then(Value::as_str),
        Some("edge-box-01-local")
    );
    let context = doc
        .get("contexts")
        .and_then(|c| c.get("edge-box-01-local"))
        .unwrap();
    let nodes = context.get("nodes").and_then(Value::as_sequence).unwrap();
    assert_eq!(nodes[0].as_str(), Some("192.168.1.50"));
    assert_eq!(context.get("crt").and_then(Value::as_str), Some("Y2xpZW50"));

    // the exported config went through the full patch set
    let exported = fs::read_to_string(&out_mc).unwrap();
    assert!(exported.contains("\"b\": 2"));

    // nothing was applied, nothing was sealed
    assert!(!repo.calls().contains("apply-config"));
    assert!(!session.layout().hash_file().exists());
}

#[test]
fn bootstrap_applies_insecurely_then_seals_and_records_the_ca() {
    let repo = BoxRepo::new();
    let session = repo.session();

    let outcome = run_bootstrap(
        &session,
        &BootstrapOptions {
            machine_ip: "192.168.1.50".to_string(),
            out_mc: None,
            out_talosconfig: None,
            dry_run: false,
            force: false,
        },
    )
    .unwrap();
    let sealed = match outcome {
        BootstrapOutcome::Applied { sealed } => sealed,
        BootstrapOutcome::DryRun => panic!("bootstrap was not a dry run"),
    };
    assert_eq!(sealed.digest.len(), 64);

    // the one apply ran straight against the IP, without credentials
    let calls = repo.calls();
    let applies: Vec<&str> = calls
        .lines()
        .filter(|l| l.contains("apply-config"))
        .collect();
    assert_eq!(applies.len(), 1);
    assert!(applies[0].contains("--nodes=192.168.1.50"));
    assert!(applies[0].contains("--insecure"));
    assert!(applies[0].contains("--mode=auto"));

    // what reached the machine is the patched candidate
    let applied: serde_json::Value =
        serde_json::from_slice(&fs::read(repo.state.join("applied-mc.json")).unwrap()).unwrap();
    assert_eq!(applied, serde_json::json!({"a": 1, "b": 2}));

    // sealed artifacts exist and the machine CA landed in the repo's
    // tunnel talosconfig
    assert!(session.layout().hash_file().exists());
    let archive = fs::read_to_string(session.layout().sealed_file()).unwrap();
    assert!(archive.starts_with("-----BEGIN PGP MESSAGE-----"));
    let teleport = repo.teleport_config();
    let context = teleport
        .get("contexts")
        .and_then(|c| c.get("edge-box-01"))
        .unwrap();
    assert_eq!(context.get("ca").and_then(Value::as_str), Some("R0VOLUNB"));
}

#[test]
fn bootstrap_needs_at_least_one_patch() {
    let repo = BoxRepo::new();
    fs::remove_dir_all(repo.root.path().join("machine/config")).unwrap();
    let session = repo.session();

    let err = run_bootstrap(
        &session,
        &BootstrapOptions {
            machine_ip: "192.168.1.50".to_string(),
            out_mc: None,
            out_talosconfig: None,
            dry_run: true,
            force: false,
        },
    )
    .unwrap_err();
    assert!(matches!(err, Error::NoPatchFiles));
}

// =============================================================================
// Mission: recover from an out-of-band change
// =============================================================================

#[test]
fn an_out_of_band_change_blocks_sync_until_resealed() {
    let repo = BoxRepo::new();
    let session = repo.session();

    let first = match session.seal_config(DEFAULT_MACHINE_CONFIG_ID).unwrap() {
        SealOutcome::Sealed(record) => record,
        SealOutcome::AlreadySealed => panic!("fresh repo cannot be sealed already"),
    };

    // someone edits the machine directly, bypassing sync
    repo.set_live("{\"a\": 1, \"c\": 3}");

    let report = session.inspect(None).unwrap();
    assert!(report.hash_stale);
    // not even force gets past a stale hash
    assert!(matches!(
        session.gate_sync(&report, true).unwrap_err(),
        Error::HashDrift
    ));

    // an explicit seal-config acknowledges the new live state
    let second = match session.seal_config(DEFAULT_MACHINE_CONFIG_ID).unwrap() {
        SealOutcome::Sealed(record) => record,
        SealOutcome::AlreadySealed => panic!("stale ledger must reseal"),
    };
    assert_ne!(first.digest, second.digest);

    let report = session.inspect(None).unwrap();
    assert!(!report.hash_stale);
    session.gate_sync(&report, false).unwrap();
}

// =============================================================================
// Mission: catch a broken workstation before it touches the box
// =============================================================================

#[test]
fn preflight_rejects_a_jq_other_than_the_pinned_one() {
    let repo = BoxRepo::new();
    // the workstation has some other jq build on PATH
    write_executable(
        Path::new(&repo.toolchain.jq),
        "#!/bin/sh\necho \"jq-1.6\"\n",
    );
    let session = repo.session();

    let err = session.preflight(&[RequiredTool::Jq]).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("expected 1.7.1"));
    assert!(message.contains("jq-1.6"));
}

#[test]
fn preflight_reports_a_missing_tool_by_name() {
    let repo = BoxRepo::new();
    let mut toolchain = repo.toolchain.clone();
    toolchain.gpg = repo
        .root
        .path()
        .join("no-such-gpg")
        .to_string_lossy()
        .into_owned();
    let session =
        MachineSession::open(RepoLayout::new(repo.root.path()), toolchain, true).unwrap();

    let err = session.preflight(&[RequiredTool::Gpg]).unwrap_err();
    assert!(err.to_string().contains("Have you installed"));
}

// =============================================================================
// Mission: size up an upgrade before starting it
// =============================================================================

#[test]
fn upgrade_overview_matches_the_repo_pins() {
    let repo = BoxRepo::new();
    let session = repo.session();

    let overview = talos_upgrade_overview(&session).unwrap();
    assert_eq!(overview.node_name, "edge-box-01");
    assert_eq!(
        overview.installer_image,
        "ghcr.io/example/installer:1.7.4-3-1"
    );
    assert_eq!(overview.repo_version, "1.7.4");
    assert_eq!(overview.live_version, "1.7.4");
    assert!(overview.extensions.in_sync());
}

#[test]
fn upgrade_overview_reports_extension_drift() {
    let repo = BoxRepo::new();
    repo.set_live_extension("iscsi-tools", "v0.1.3");
    let session = repo.session();

    let overview = talos_upgrade_overview(&session).unwrap();
    assert!(!overview.extensions.in_sync());
    let rows = overview.extensions.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "iscsi-tools");
    assert_eq!(rows[0].repo.as_deref(), Some("v0.1.4"));
    assert_eq!(rows[0].live.as_deref(), Some("v0.1.3"));
    assert!(!rows[0].synced());
}

// =============================================================================
// Mission: patch a config that never came from the machine
// =============================================================================

#[test]
fn patch_config_accepts_a_provided_document() {
    let repo = BoxRepo::new();
    let session = repo.session();

    let patched = session
        .patch_config(PatchSource::Provided(b"{\"a\": 1}".to_vec()), &[])
        .unwrap();
    assert!(patched.to_text().contains("\"b\": 2"));

    // provided bytes are validated before any patch runs
    assert!(repo.calls().lines().any(|l| l.contains("validate")));
}

#[test]
fn patch_config_rejects_garbage_input() {
    let repo = BoxRepo::new();
    let session = repo.session();

    let err = session
        .patch_config(PatchSource::Provided(b"not json".to_vec()), &[])
        .unwrap_err();
    assert!(matches!(err, Error::Json(_)));
}

#[test]
fn generated_configs_take_the_first_boot_patches_too() {
    let repo = BoxRepo::new();
    let session = repo.session();

    let patched = session.patch_config(PatchSource::Generated, &[]).unwrap();
    assert!(patched.to_text().contains("\"b\": 2"));
    assert!(repo.calls().contains("gen config"));
}
