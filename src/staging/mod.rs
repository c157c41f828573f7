//! Lifecycle of the private staging tree.
//!
//! A [`StagingArea`] is acquired at the start of a run and disposed exactly
//! once on the way out. `prepare` clears whatever a crashed run left behind
//! and creates a fresh, empty directory; `dispose` removes the tree again.
//! Dropping an area that was never disposed removes the tree and logs the
//! outcome, so the path never outlives the run even when a step panics.

use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Permissions of the staging root and of table directories within it.
pub const STAGING_DIR_MODE: u32 = 0o755;

/// Errors raised while managing the staging tree.
#[derive(Debug, Error)]
pub enum StagingError {
    /// A stale entry at the staging path could not be removed.
    #[error("cannot clear stale staging entry {path}: {source}")]
    Conflict {
        /// Staging path.
        path: Utf8PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: io::Error,
    },
    /// The fresh staging directory could not be created.
    #[error("cannot create staging directory {path}: {source}")]
    Create {
        /// Staging path.
        path: Utf8PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: io::Error,
    },
    /// The staging tree could not be removed at the end of the run.
    #[error("cannot remove staging tree {path}: {source}")]
    Dispose {
        /// Staging path.
        path: Utf8PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: io::Error,
    },
}

/// Scoped owner of the staging path for one run.
#[derive(Debug)]
pub struct StagingArea {
    root: Utf8PathBuf,
    disposed: bool,
}

impl StagingArea {
    /// Takes responsibility for `root`. Nothing is touched until
    /// [`StagingArea::prepare`] runs, but the path is removed on dispose or
    /// drop either way.
    #[must_use]
    pub fn acquire(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            disposed: false,
        }
    }

    /// Staging root.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Removes any existing file or directory at the root and creates an
    /// empty directory with [`STAGING_DIR_MODE`].
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::Conflict`] when a stale entry cannot be
    /// removed and [`StagingError::Create`] when the directory cannot be
    /// created.
    pub fn prepare(&self) -> Result<(), StagingError> {
        self.clear_stale()?;
        self.create()
    }

    /// Removes whatever a crashed run left at the root, leaving the path
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::Conflict`] when the stale entry cannot be
    /// removed.
    pub fn clear_stale(&self) -> Result<(), StagingError> {
        debug!(path = %self.root, "removing any stale staging entry");
        remove_entry(&self.root).map_err(|source| StagingError::Conflict {
            path: self.root.clone(),
            source,
        })
    }

    /// Creates the empty root directory with [`STAGING_DIR_MODE`].
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::Create`] when the directory cannot be
    /// created, including when something already occupies the path.
    pub fn create(&self) -> Result<(), StagingError> {
        DirBuilder::new()
            .recursive(true)
            .mode(STAGING_DIR_MODE)
            .create(&self.root)
            .map_err(|source| StagingError::Create {
                path: self.root.clone(),
                source,
            })
    }

    /// Removes the staging tree and reports the outcome. A missing tree is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StagingError::Dispose`] when removal fails.
    pub fn dispose(mut self) -> Result<(), StagingError> {
        self.disposed = true;
        debug!(path = %self.root, "removing staging tree");
        remove_entry(&self.root).map_err(|source| StagingError::Dispose {
            path: self.root.clone(),
            source,
        })
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        if let Err(err) = remove_entry(&self.root) {
            warn!(path = %self.root, error = %err, "failed to remove staging tree on drop");
        }
    }
}

/// Removes a file, symlink or directory tree at `path` without following a
/// symlink at `path` itself.
pub(crate) fn remove_entry(path: &Utf8Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
