//! Behavioural tests for the `snapstage` binary.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::process::Command as StdCommand;

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use camino::{Utf8Path, Utf8PathBuf};
use predicates::str::contains;
use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

struct Sandbox {
    _tmp: TempDir,
    base: Utf8PathBuf,
}

impl Sandbox {
    /// Binary isolated from the caller's configuration files and
    /// `SNAPSTAGE_*` variables.
    fn command(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("snapstage");
        cmd.env("HOME", self.base.as_str())
            .env_remove("XDG_CONFIG_HOME")
            .env_remove("SNAPSTAGE_ENDPOINT")
            .env_remove("SNAPSTAGE_CONFIG_PATH")
            .env("SNAPSTAGE_STAGING_ROOT", self.staging().as_str())
            .current_dir(self.base.as_str());
        cmd
    }

    fn data_dir(&self) -> Utf8PathBuf {
        self.base.join("data")
    }

    fn staging(&self) -> Utf8PathBuf {
        self.base.join("staging")
    }
}

#[fixture]
fn sandbox() -> Sandbox {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let base = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    Sandbox { _tmp: tmp, base }
}

fn true_binary() -> &'static str {
    ["/usr/bin/true", "/bin/true"]
        .into_iter()
        .find(|path| Utf8Path::new(path).exists())
        .unwrap_or_else(|| panic!("no `true` binary on this host"))
}

fn write_file(path: &Utf8Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap_or_else(|err| panic!("create {parent}: {err}"));
    }
    fs::write(path, contents).unwrap_or_else(|err| panic!("write {path}: {err}"));
}

#[rstest]
fn validate_accepts_defaults(sandbox: Sandbox) {
    sandbox
        .command()
        .arg("validate")
        .assert()
        .success()
        .stdout(contains("\u{2713} cassandra_host"))
        .stdout(contains("\u{2713} cassandra_password"));
}

#[rstest]
fn validate_reports_bad_port(sandbox: Sandbox) {
    sandbox
        .command()
        .args(["validate", "--endpoint", r#"{"cassandra_port": "nine"}"#])
        .assert()
        .code(1)
        .stdout(contains("\u{2717} cassandra_port"))
        .stderr(contains("error:"));
}

#[rstest]
fn backup_rejects_malformed_endpoint(sandbox: Sandbox) {
    sandbox
        .command()
        .args(["backup", "--endpoint", "{not json"])
        .assert()
        .code(1)
        .stdout("")
        .stderr(contains("endpoint is not valid JSON"));
}

#[rstest]
fn restore_refuses_running_store(sandbox: Sandbox) {
    let table = sandbox.data_dir().join("app/users-1/mc-1-big-Data.db");
    write_file(&table, "alice");
    let endpoint = json!({ "cassandra_datadir": sandbox.data_dir().as_str() }).to_string();

    sandbox
        .command()
        .env("SNAPSTAGE_PGREP_BIN", true_binary())
        .args(["restore", "--endpoint", endpoint.as_str()])
        .arg("--archive")
        .arg(sandbox.base.join("missing.tar").as_str())
        .assert()
        .code(1)
        .stderr(contains("precondition failed"));

    assert_eq!(fs::read_to_string(&table).expect("table survives"), "alice");
}

#[rstest]
fn backup_writes_archive_of_staged_tables(sandbox: Sandbox) {
    let bindir = sandbox.base.join("bin");
    fs::create_dir_all(&bindir).expect("bindir");
    let nodetool = bindir.join("nodetool");
    write_file(&nodetool, "#!/bin/sh\nexit 0\n");
    fs::set_permissions(&nodetool, fs::Permissions::from_mode(0o755)).expect("nodetool stub");
    write_file(
        &sandbox
            .data_dir()
            .join("app/users-5a1c/snapshots/shield-backup/mc-1-big-Data.db"),
        "alice",
    );
    let archive = sandbox.base.join("node.tar");
    let endpoint = json!({
        "cassandra_bindir": bindir.as_str(),
        "cassandra_datadir": sandbox.data_dir().as_str(),
    })
    .to_string();

    sandbox
        .command()
        .env("SNAPSTAGE_CHOWN_BIN", true_binary())
        .args(["backup", "--endpoint", endpoint.as_str()])
        .arg("--archive")
        .arg(archive.as_str())
        .assert()
        .success()
        .stdout("")
        .stderr(contains("\u{2713} Stream tar of staged files"));

    let listing = StdCommand::new("tar")
        .arg("-tf")
        .arg(archive.as_str())
        .output()
        .expect("list archive");
    let names = String::from_utf8_lossy(&listing.stdout);
    assert!(names.contains("app/users/mc-1-big-Data.db"), "{names}");
    assert!(!sandbox.staging().exists());
}
