//! Restore sequencer.
//!
//! A restore first clears any staging tree a crashed run left behind, so a
//! conflict there aborts with the data directory untouched. It then
//! refuses to run while the store daemon is up, empties the live
//! data directory after recording its owner, unpacks the incoming archive
//! into staging, bulk-loads every selected table with `sstableloader`, hands
//! the data directory back to its recorded owner and removes the staging
//! tree. Progress through these stages is tracked as a [`RestoreStage`].

use std::fmt;
use std::fs;
use std::io::{self, Write};

use camino::Utf8Path;
use tracing::debug;

use crate::config::AgentConfig;
use crate::endpoint::Endpoint;
use crate::error::{FsError, PipelineError, settle};
use crate::linker::{open_directory, subdirectories};
use crate::ownership::Ownership;
use crate::progress::Progress;
use crate::staging::{StagingArea, remove_entry};
use crate::store::{StoreSettings, is_store_running};
use crate::tool::{ExpectedCodes, ToolIo, ToolRunner, invoke};
use crate::transport::{ArchiveStream, read_archive};

/// Stage a restore run has reached.
///
/// Stages advance strictly in declaration order. [`RestoreStage::Failed`]
/// is entered from any non-terminal stage when a step fails; the staging
/// tree is still removed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RestoreStage {
    /// Not started, or clearing a stale staging tree before the preflights.
    #[default]
    Idle,
    /// Checking that the store daemon is not running.
    PreflightStoreStopped,
    /// Recording the data directory's owner and emptying it.
    PreflightDataDirEmpty,
    /// Fresh staging directory created.
    StagingPrepared,
    /// Incoming archive unpacked into staging.
    ArchiveIngested,
    /// Bulk-loading staged tables.
    PerPartitionLoad,
    /// Recorded owner re-applied to the data directory.
    OwnershipRestored,
    /// Removing the staging tree after a successful load.
    Cleanup,
    /// Run finished successfully.
    Done,
    /// Run aborted.
    Failed,
}

impl RestoreStage {
    /// `true` for [`RestoreStage::Done`] and [`RestoreStage::Failed`].
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::PreflightStoreStopped => "preflight: store stopped",
            Self::PreflightDataDirEmpty => "preflight: data directory empty",
            Self::StagingPrepared => "staging prepared",
            Self::ArchiveIngested => "archive ingested",
            Self::PerPartitionLoad => "per-keyspace load",
            Self::OwnershipRestored => "ownership restored",
            Self::Cleanup => "cleanup",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a successful restore loaded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RestoreReport {
    /// Final stage, always [`RestoreStage::Done`] for a returned report.
    pub stage: RestoreStage,
    /// Number of `sstableloader` invocations.
    pub tables_loaded: usize,
    /// Owner re-applied to the data directory.
    pub ownership: Ownership,
}

/// Runs restores for one node.
#[derive(Debug)]
pub struct Restore<R, W: Write = io::Stderr> {
    config: AgentConfig,
    runner: R,
    archive: ArchiveStream,
    progress: Progress<W>,
    stage: RestoreStage,
}

impl<R: ToolRunner> Restore<R> {
    /// Restore reading the archive from stdin and reporting progress on
    /// stderr.
    #[must_use]
    pub fn new(config: AgentConfig, runner: R) -> Self {
        Self {
            config,
            runner,
            archive: ArchiveStream::Stdio,
            progress: Progress::stderr(),
            stage: RestoreStage::Idle,
        }
    }
}

impl<R: ToolRunner, W: Write> Restore<R, W> {
    /// Reads the archive from `archive` instead of stdin.
    #[must_use]
    pub fn with_archive(mut self, archive: ArchiveStream) -> Self {
        self.archive = archive;
        self
    }

    /// Reports progress lines to `progress`.
    #[must_use]
    pub fn with_progress<V: Write>(self, progress: Progress<V>) -> Restore<R, V> {
        Restore {
            config: self.config,
            runner: self.runner,
            archive: self.archive,
            progress,
            stage: self.stage,
        }
    }

    /// Stage reached by the most recent run.
    #[must_use]
    pub const fn stage(&self) -> RestoreStage {
        self.stage
    }

    /// Progress sink, for inspecting reported lines.
    #[must_use]
    pub const fn progress(&self) -> &Progress<W> {
        &self.progress
    }

    /// Runs one restore with the settings in `endpoint`.
    ///
    /// The keyspace filter is derived from this endpoint, not from the
    /// backup that produced the archive.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Precondition`] when the store is running or
    /// the data directory is missing, before anything is modified. Any
    /// later failure aborts the remaining steps; the staging tree is removed
    /// either way.
    pub fn run(&mut self, endpoint: &Endpoint) -> Result<RestoreReport, PipelineError> {
        self.stage = RestoreStage::Idle;
        let prepared = self
            .config
            .validate()
            .map_err(PipelineError::from)
            .and_then(|()| StoreSettings::from_endpoint(endpoint).map_err(PipelineError::from));
        let settings = match prepared {
            Ok(settings) => settings,
            Err(err) => {
                self.stage = RestoreStage::Failed;
                return Err(err);
            }
        };

        let Self {
            config,
            runner,
            archive,
            progress,
            stage,
        } = self;
        let staging = StagingArea::acquire(config.staging_root());
        let outcome = Sequencer {
            config,
            runner,
            settings: &settings,
            archive,
            staging: &staging,
            progress: &mut *progress,
            stage: &mut *stage,
        }
        .advance();
        *stage = if outcome.is_ok() {
            RestoreStage::Cleanup
        } else {
            RestoreStage::Failed
        };

        let dispose = progress.step(
            "Remove staging directory",
            staging.dispose().map_err(PipelineError::from),
        );
        let result = settle(outcome, vec![dispose]);
        *stage = if result.is_ok() {
            RestoreStage::Done
        } else {
            RestoreStage::Failed
        };
        result.map(|(tables_loaded, ownership)| RestoreReport {
            stage: RestoreStage::Done,
            tables_loaded,
            ownership,
        })
    }
}

struct Sequencer<'a, R: ?Sized, W: Write> {
    config: &'a AgentConfig,
    runner: &'a R,
    settings: &'a StoreSettings,
    archive: &'a ArchiveStream,
    staging: &'a StagingArea,
    progress: &'a mut Progress<W>,
    stage: &'a mut RestoreStage,
}

impl<R: ToolRunner + ?Sized, W: Write> Sequencer<'_, R, W> {
    fn enter(&mut self, next: RestoreStage) {
        debug!(stage = %next, "restore stage");
        *self.stage = next;
    }

    fn advance(&mut self) -> Result<(usize, Ownership), PipelineError> {
        self.progress
            .step("Clear stale staging directory", self.staging.clear_stale())?;

        self.enter(RestoreStage::PreflightStoreStopped);
        let running = is_store_running(self.runner, self.settings, &self.config.pgrep_bin);
        let stopped = running.map_err(PipelineError::from).and_then(|up| {
            if up {
                Err(PipelineError::precondition(format!(
                    "the data store is running (pgrep -f {}); stop it before restoring",
                    self.settings.process_pattern
                )))
            } else {
                Ok(())
            }
        });
        self.progress.step("Check that the data store is stopped", stopped)?;

        self.enter(RestoreStage::PreflightDataDirEmpty);
        let emptied = empty_data_directory(&self.settings.datadir);
        let ownership = self.progress.step("Empty data directory", emptied)?;

        self.enter(RestoreStage::StagingPrepared);
        self.progress
            .step("Prepare staging directory", self.staging.create())?;

        self.enter(RestoreStage::ArchiveIngested);
        let ingested = read_archive(
            self.runner,
            &self.settings.tar,
            self.staging.root(),
            self.archive,
        );
        self.progress
            .step("Extract tar to staging directory", ingested)?;

        self.enter(RestoreStage::PerPartitionLoad);
        let tables_loaded = self.load_keyspaces()?;

        self.enter(RestoreStage::OwnershipRestored);
        let restored = ownership.apply_recursive(&self.settings.datadir);
        self.progress
            .step("Restore data directory ownership", restored)?;

        Ok((tables_loaded, ownership))
    }

    fn load_keyspaces(&mut self) -> Result<usize, PipelineError> {
        let root = self.staging.root();
        let listed = open_directory(root).and_then(|dir| subdirectories(&dir, root));
        let keyspaces = self.progress.step("List staged keyspaces", listed)?;

        let mut loaded = 0;
        for keyspace in keyspaces {
            if !self.settings.filter().selects(&keyspace) {
                debug!(keyspace = %keyspace, "excluding keyspace");
                continue;
            }
            let result = self.load_keyspace(&root.join(&keyspace));
            let count = self
                .progress
                .step(&format!("Load tables data for keyspace '{keyspace}'"), result)?;
            loaded += count;
        }
        Ok(loaded)
    }

    fn load_keyspace(&self, keyspace_dir: &Utf8Path) -> Result<usize, PipelineError> {
        let dir = open_directory(keyspace_dir)?;
        let tables = subdirectories(&dir, keyspace_dir)?;
        for table in &tables {
            invoke(
                self.runner,
                &self.settings.bulk_load_command(&keyspace_dir.join(table)),
                &ToolIo::quiet(),
                &ExpectedCodes::success(),
            )?;
        }
        Ok(tables.len())
    }
}

/// Records the data directory's owner, then removes every entry inside it.
fn empty_data_directory(data_dir: &Utf8Path) -> Result<Ownership, PipelineError> {
    match fs::metadata(data_dir) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(PipelineError::precondition(format!(
                "data directory {data_dir} is not a directory"
            )));
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(PipelineError::precondition(format!(
                "data directory {data_dir} does not exist"
            )));
        }
        Err(err) => return Err(FsError::new("stat", data_dir, err).into()),
    }

    let ownership = Ownership::capture(data_dir)?;
    let dir = open_directory(data_dir)?;
    let entries = dir
        .entries()
        .map_err(|err| FsError::new("list", data_dir, err))?;
    for entry in entries {
        let name = entry
            .and_then(|item| item.file_name())
            .map_err(|err| FsError::new("list", data_dir, err))?;
        let path = data_dir.join(name);
        remove_entry(&path).map_err(|err| FsError::new("remove", &path, err))?;
    }
    debug!(path = %data_dir, uid = ownership.uid, gid = ownership.gid, "emptied data directory");
    Ok(ownership)
}
