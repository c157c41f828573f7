//! File ownership normalisation for staged and restored trees.
//!
//! Backup hands the staging tree to the service identity with `chown -R`
//! before it is archived. Restore records who owns the live data directory
//! before wiping it and re-applies that identity to everything the bulk
//! loader wrote.

use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, lchown};

use camino::Utf8Path;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::FsError;
use crate::tool::{ExpectedCodes, ToolCommand, ToolError, ToolIo, ToolRunner, invoke};

/// Numeric owner of a directory, captured before a destructive wipe.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ownership {
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
}

impl Ownership {
    /// Reads the owner of `path`, following symlinks.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] when `path` cannot be stat'ed.
    pub fn capture(path: &Utf8Path) -> Result<Self, FsError> {
        let meta = fs::metadata(path).map_err(|err| FsError::new("stat", path, err))?;
        Ok(Self {
            uid: meta.uid(),
            gid: meta.gid(),
        })
    }

    /// Applies this owner to `root` and every entry below it.
    ///
    /// Symlinks are re-owned themselves and never followed. Returns the
    /// number of entries updated.
    ///
    /// # Errors
    ///
    /// Returns [`FsError`] for the first entry that cannot be visited or
    /// re-owned.
    pub fn apply_recursive(self, root: &Utf8Path) -> Result<usize, FsError> {
        let mut updated = 0;
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|err| {
                let path = err
                    .path()
                    .and_then(Utf8Path::from_path)
                    .unwrap_or(root)
                    .to_path_buf();
                FsError::new("walk", &path, io::Error::from(err))
            })?;
            let path = entry.path();
            lchown(path, Some(self.uid), Some(self.gid)).map_err(|err| {
                FsError::new(
                    "change ownership of",
                    Utf8Path::from_path(path).unwrap_or(root),
                    err,
                )
            })?;
            updated += 1;
        }
        debug!(root = %root, uid = self.uid, gid = self.gid, entries = updated, "restored ownership");
        Ok(updated)
    }
}

/// Builds `chown -R {owner} {root}`.
#[must_use]
pub fn service_owner_command(chown_bin: &str, owner: &str, root: &Utf8Path) -> ToolCommand {
    ToolCommand::new(chown_bin)
        .arg("-R")
        .arg(owner)
        .arg(root.as_str())
}

/// Hands `root` and everything below it to the `user:group` in `owner`.
///
/// # Errors
///
/// Returns [`ToolError`] when `chown` cannot start or exits non-zero.
pub fn assign_service_owner<R>(
    runner: &R,
    chown_bin: &str,
    owner: &str,
    root: &Utf8Path,
) -> Result<(), ToolError>
where
    R: ToolRunner + ?Sized,
{
    invoke(
        runner,
        &service_owner_command(chown_bin, owner, root),
        &ToolIo::quiet(),
        &ExpectedCodes::success(),
    )
    .map(drop)
}
