//! End-to-end backup and restore against a simulated store.
//!
//! Backups stream into an archive file with the real `tar`; the archive is
//! then restored into an emptied data directory through the simulated bulk
//! loader.

#[path = "common/store_simulator.rs"]
mod store_simulator;

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::MetadataExt;

use camino::{Utf8Path, Utf8PathBuf};
use rstest::{fixture, rstest};
use serde_json::json;
use snapstage::{
    AgentConfig, ArchiveStream, Backup, Endpoint, PipelineError, Progress, Restore, RestoreStage,
    normalize_table_name,
};
use store_simulator::{LOADED_TABLE_SUFFIX, StoreSimulator};
use tempfile::TempDir;

struct Node {
    _tmp: TempDir,
    data_dir: Utf8PathBuf,
    staging: Utf8PathBuf,
    archive: Utf8PathBuf,
    store: StoreSimulator,
}

impl Node {
    fn endpoint(&self, include: &[&str]) -> Endpoint {
        Endpoint::from_value(json!({
            "cassandra_datadir": self.data_dir.as_str(),
            "cassandra_include_keyspaces": include,
        }))
        .unwrap_or_else(|err| panic!("endpoint: {err}"))
    }

    fn backup(&self, include: &[&str]) -> Result<snapstage::BackupReport, PipelineError> {
        Backup::new(
            AgentConfig::with_staging_root(&self.staging),
            self.store.clone(),
        )
        .with_archive(ArchiveStream::File(self.archive.clone()))
        .with_progress(Progress::new(Vec::new()))
        .run(&self.endpoint(include))
    }

    fn restore(&self) -> (Restore<StoreSimulator, Vec<u8>>, Result<snapstage::RestoreReport, PipelineError>) {
        let mut restore = Restore::new(
            AgentConfig::with_staging_root(&self.staging),
            self.store.clone(),
        )
        .with_archive(ArchiveStream::File(self.archive.clone()))
        .with_progress(Progress::new(Vec::new()));
        let result = restore.run(&self.endpoint(&[]));
        (restore, result)
    }
}

fn write_table(data_dir: &Utf8Path, keyspace: &str, table: &str, payload: &str) {
    let dir = data_dir.join(keyspace).join(table);
    fs::create_dir_all(&dir).unwrap_or_else(|err| panic!("create {dir}: {err}"));
    for (component, contents) in [
        ("Data.db", payload.as_bytes().to_vec()),
        ("Index.db", format!("index of {table}").into_bytes()),
        ("Statistics.db", vec![0, 159, 255, 7]),
    ] {
        fs::write(dir.join(format!("mc-1-big-{component}")), contents)
            .unwrap_or_else(|err| panic!("write table {table}: {err}"));
    }
}

/// Every regular table file as `{keyspace}/{table}/{file}` with the table's
/// id suffix removed, mapped to its bytes.
fn table_files(data_dir: &Utf8Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    for keyspace in fs::read_dir(data_dir).expect("data dir") {
        let keyspace = keyspace.expect("keyspace entry");
        for table in fs::read_dir(keyspace.path()).expect("keyspace dir") {
            let table = table.expect("table entry");
            let table_name = table.file_name().to_string_lossy().into_owned();
            for file in fs::read_dir(table.path()).expect("table dir") {
                let file = file.expect("file entry");
                if !file.file_type().expect("file type").is_file() {
                    continue;
                }
                let key = format!(
                    "{}/{}/{}",
                    keyspace.file_name().to_string_lossy(),
                    normalize_table_name(&table_name),
                    file.file_name().to_string_lossy()
                );
                files.insert(key, fs::read(file.path()).expect("table file"));
            }
        }
    }
    files
}

#[fixture]
fn node() -> Node {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let base = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    let data_dir = base.join("data");
    write_table(&data_dir, "app", "users-5a1c", "alice,bob");
    write_table(&data_dir, "app", "orders-77e0", "order-1");
    write_table(&data_dir, "system", "local-0001", "node-identity");
    let store = StoreSimulator::new(&data_dir);

    Node {
        _tmp: tmp,
        data_dir,
        staging: base.join("staging"),
        archive: base.join("node.tar"),
        store,
    }
}

#[rstest]
fn backup_then_restore_recreates_user_tables(node: Node) {
    let mut expected = table_files(&node.data_dir);
    expected.retain(|path, _| !path.starts_with("system/"));
    assert_eq!(expected.len(), 6);

    let report = node.backup(&[]).expect("backup succeeds");
    assert!(report.snapshot_taken);
    assert_eq!(report.summary.keyspaces, 1);
    assert_eq!(report.summary.tables, 2);
    assert_eq!(report.summary.files, 6);
    assert!(!node.staging.exists(), "staging is removed after backup");
    assert!(
        !node
            .data_dir
            .join("app/users-5a1c/snapshots/shield-backup")
            .exists(),
        "snapshot is cleared after backup"
    );

    let (restore, result) = node.restore();
    let report = result.expect("restore succeeds");

    assert_eq!(restore.stage(), RestoreStage::Done);
    assert_eq!(report.tables_loaded, 2);
    assert_eq!(table_files(&node.data_dir), expected);
    assert!(
        node.data_dir
            .join(format!("app/users-{LOADED_TABLE_SUFFIX}"))
            .is_dir(),
        "tables come back through the bulk loader"
    );
    assert!(
        !node.data_dir.join("app/users-5a1c").exists(),
        "restore starts from an emptied data directory"
    );
    assert!(
        !node.data_dir.join("system").exists(),
        "system keyspace never leaves the node"
    );
    assert!(!node.staging.exists(), "staging is removed after restore");
}

#[rstest]
fn restored_tree_keeps_data_directory_owner(node: Node) {
    node.backup(&[]).expect("backup succeeds");
    let owner = fs::metadata(&node.data_dir).expect("data dir").uid();

    let (_, result) = node.restore();
    result.expect("restore succeeds");

    let loaded = node.data_dir.join(format!("app/orders-{LOADED_TABLE_SUFFIX}"));
    assert_eq!(fs::metadata(&loaded).expect("loaded table").uid(), owner);
}

#[rstest]
fn explicit_include_limits_the_archive(node: Node) {
    write_table(&node.data_dir, "metrics", "samples-9f00", "42");

    let report = node.backup(&["metrics"]).expect("backup succeeds");
    assert_eq!(report.summary.tables, 1);

    let (_, result) = node.restore();
    result.expect("restore succeeds");
    assert!(
        node.data_dir
            .join(format!("metrics/samples-{LOADED_TABLE_SUFFIX}/mc-1-big-Data.db"))
            .exists()
    );
    assert!(!node.data_dir.join("app").exists());
}

#[rstest]
fn restore_refuses_a_running_store(node: Node) {
    node.backup(&[]).expect("backup succeeds");
    node.store.set_running(true);

    let (restore, result) = node.restore();

    let err = result.expect_err("running store must block restore");
    assert!(matches!(err, PipelineError::Precondition { .. }));
    assert_eq!(restore.stage(), RestoreStage::Failed);
    assert!(
        node.data_dir.join("app/users-5a1c/mc-1-big-Data.db").exists(),
        "data directory is untouched"
    );
    assert!(!node.store.programs().iter().any(|program| program == "sstableloader"));
}
