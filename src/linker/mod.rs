//! Populates the staging tree from store-side snapshot files.
//!
//! The live layout is `{data_dir}/{keyspace}/{table-id}/snapshots/{tag}/*`.
//! Each regular file found there is hard-linked to
//! `{staging}/{keyspace}/{table}/`, where `{table}` is the live directory name
//! without the storage engine's `-{id}` suffix. Snapshot files are immutable,
//! so linking costs one directory entry per file and no data copy.

use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tracing::debug;

use crate::error::FsError;
use crate::filter::KeyspaceFilter;
use crate::staging::STAGING_DIR_MODE;

/// Name of the per-table directory holding store-side snapshots.
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Permissions of staged keyspace directories.
pub const KEYSPACE_DIR_MODE: u32 = 0o700;

/// Counts of what was staged, for diagnostics.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LinkSummary {
    /// Keyspaces selected by the filter.
    pub keyspaces: usize,
    /// Tables that had a snapshot directory.
    pub tables: usize,
    /// Files hard-linked into staging.
    pub files: usize,
}

/// Strips the storage-engine suffix (text after the last `-`) from a live
/// table directory name. Names without a suffix are returned unchanged.
///
/// # Examples
///
/// ```
/// # use snapstage::linker::normalize_table_name;
/// assert_eq!(normalize_table_name("users-a1b2c3d4"), "users");
/// assert_eq!(normalize_table_name("orders"), "orders");
/// ```
#[must_use]
pub fn normalize_table_name(dir_name: &str) -> &str {
    match dir_name.rsplit_once('-') {
        Some((table, _)) if !table.is_empty() => table,
        _ => dir_name,
    }
}

/// Hard-links one snapshot's files from a data directory into staging.
#[derive(Clone, Copy, Debug)]
pub struct SnapshotLinker<'a> {
    data_dir: &'a Utf8Path,
    staging_root: &'a Utf8Path,
    snapshot_name: &'a str,
}

impl<'a> SnapshotLinker<'a> {
    /// Creates a linker for the snapshot tagged `snapshot_name`.
    #[must_use]
    pub const fn new(
        data_dir: &'a Utf8Path,
        staging_root: &'a Utf8Path,
        snapshot_name: &'a str,
    ) -> Self {
        Self {
            data_dir,
            staging_root,
            snapshot_name,
        }
    }

    /// Links every selected keyspace's snapshot files into staging.
    ///
    /// Tables without a snapshot directory are skipped. Only regular files
    /// are linked; symlinks and nested directories are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when the data directory is not a directory or
    /// when any traversal, directory creation or link operation fails.
    /// Partially staged files are left for the staging cleanup.
    pub fn link(&self, filter: &KeyspaceFilter) -> Result<LinkSummary, FsError> {
        let data = open_directory(self.data_dir)?;
        let mut summary = LinkSummary::default();

        for keyspace in subdirectories(&data, self.data_dir)? {
            if !filter.selects(&keyspace) {
                debug!(keyspace = %keyspace, "excluding keyspace");
                continue;
            }
            summary.keyspaces += 1;
            self.link_keyspace(&data, &keyspace, &mut summary)?;
        }

        debug!(
            keyspaces = summary.keyspaces,
            tables = summary.tables,
            files = summary.files,
            "staged snapshot files"
        );
        Ok(summary)
    }

    fn link_keyspace(
        &self,
        data: &Dir,
        keyspace: &str,
        summary: &mut LinkSummary,
    ) -> Result<(), FsError> {
        let live_keyspace = self.data_dir.join(keyspace);
        let staged_keyspace = self.staging_root.join(keyspace);
        create_directory(&staged_keyspace, KEYSPACE_DIR_MODE, false)?;

        let keyspace_dir = data
            .open_dir(keyspace)
            .map_err(|err| FsError::new("open keyspace directory", &live_keyspace, err))?;

        for table_dir_name in subdirectories(&keyspace_dir, &live_keyspace)? {
            let snapshot_rel = Utf8PathBuf::from(&table_dir_name)
                .join(SNAPSHOTS_DIR)
                .join(self.snapshot_name);
            let snapshot_path = live_keyspace.join(&snapshot_rel);
            let snapshot_dir = match keyspace_dir.open_dir(&snapshot_rel) {
                Ok(dir) => dir,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!(table = %table_dir_name, keyspace, "no snapshot; skipping table");
                    continue;
                }
                Err(err) => {
                    return Err(FsError::new("open snapshot directory", &snapshot_path, err));
                }
            };

            let staged_table = staged_keyspace.join(normalize_table_name(&table_dir_name));
            create_directory(&staged_table, STAGING_DIR_MODE, true)?;
            summary.tables += 1;
            summary.files += link_files(&snapshot_dir, &snapshot_path, &staged_table)?;
        }
        Ok(())
    }
}

fn link_files(
    snapshot_dir: &Dir,
    snapshot_path: &Utf8Path,
    staged_table: &Utf8Path,
) -> Result<usize, FsError> {
    let mut linked = 0;
    let entries = snapshot_dir
        .entries()
        .map_err(|err| FsError::new("list snapshot directory", snapshot_path, err))?;
    for entry in entries {
        let entry =
            entry.map_err(|err| FsError::new("list snapshot directory", snapshot_path, err))?;
        let is_file = entry
            .file_type()
            .map_err(|err| FsError::new("inspect snapshot entry", snapshot_path, err))?
            .is_file();
        if !is_file {
            continue;
        }
        let name = entry
            .file_name()
            .map_err(|err| FsError::new("read snapshot entry name", snapshot_path, err))?;
        let source = snapshot_path.join(&name);
        let target = staged_table.join(&name);
        fs::hard_link(&source, &target).map_err(|err| FsError::new("hard-link", &source, err))?;
        linked += 1;
    }
    Ok(linked)
}

/// Opens `path` for traversal after checking it is a directory.
pub(crate) fn open_directory(path: &Utf8Path) -> Result<Dir, FsError> {
    let meta = fs::metadata(path).map_err(|err| FsError::new("stat", path, err))?;
    if !meta.is_dir() {
        return Err(FsError::new(
            "use as a directory",
            path,
            io::Error::from(io::ErrorKind::NotADirectory),
        ));
    }
    Dir::open_ambient_dir(path, ambient_authority())
        .map_err(|err| FsError::new("open directory", path, err))
}

/// Sorted names of the real (non-symlink) subdirectories of `dir`.
pub(crate) fn subdirectories(dir: &Dir, path: &Utf8Path) -> Result<Vec<String>, FsError> {
    let mut names = Vec::new();
    let entries = dir
        .entries()
        .map_err(|err| FsError::new("list directory", path, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| FsError::new("list directory", path, err))?;
        let is_dir = entry
            .file_type()
            .map_err(|err| FsError::new("inspect entry in", path, err))?
            .is_dir();
        if is_dir {
            names.push(
                entry
                    .file_name()
                    .map_err(|err| FsError::new("read entry name in", path, err))?,
            );
        }
    }
    names.sort();
    Ok(names)
}

fn create_directory(path: &Utf8Path, mode: u32, recursive: bool) -> Result<(), FsError> {
    DirBuilder::new()
        .recursive(recursive)
        .mode(mode)
        .create(path)
        .map_err(|err| FsError::new("create directory", path, err))
}
