//! Backup pipeline: snapshot, stage, archive, tear down.
//!
//! The run clears a stale staging tree and a stale store-side snapshot,
//! takes a fresh snapshot, hard-links the selected keyspaces into staging,
//! hands the tree to the service identity and streams it out with `tar`.
//! The snapshot and the staging tree are removed on every exit path.

use std::io::{self, Write};

use tracing::{debug, info};

use crate::config::AgentConfig;
use crate::endpoint::Endpoint;
use crate::error::{PipelineError, settle};
use crate::linker::{LinkSummary, SnapshotLinker};
use crate::ownership::assign_service_owner;
use crate::progress::Progress;
use crate::staging::StagingArea;
use crate::store::{SnapshotGuard, StoreSettings};
use crate::tool::{ExpectedCodes, ToolIo, ToolRunner, invoke};
use crate::transport::{ArchiveStream, write_archive};

/// What a successful backup staged and streamed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BackupReport {
    /// Counts of staged keyspaces, tables and files.
    pub summary: LinkSummary,
    /// `false` when an explicit include list was emptied by exclusion and
    /// no snapshot was requested.
    pub snapshot_taken: bool,
}

/// Runs backups for one node.
#[derive(Debug)]
pub struct Backup<R, W: Write = io::Stderr> {
    config: AgentConfig,
    runner: R,
    archive: ArchiveStream,
    progress: Progress<W>,
}

impl<R: ToolRunner> Backup<R> {
    /// Backup writing the archive to stdout and progress to stderr.
    #[must_use]
    pub fn new(config: AgentConfig, runner: R) -> Self {
        Self {
            config,
            runner,
            archive: ArchiveStream::Stdio,
            progress: Progress::stderr(),
        }
    }
}

impl<R: ToolRunner, W: Write> Backup<R, W> {
    /// Sends the archive to `archive` instead of stdout.
    #[must_use]
    pub fn with_archive(mut self, archive: ArchiveStream) -> Self {
        self.archive = archive;
        self
    }

    /// Reports progress lines to `progress`.
    #[must_use]
    pub fn with_progress<V: Write>(self, progress: Progress<V>) -> Backup<R, V> {
        Backup {
            config: self.config,
            runner: self.runner,
            archive: self.archive,
            progress,
        }
    }

    /// Progress sink, for inspecting reported lines.
    #[must_use]
    pub const fn progress(&self) -> &Progress<W> {
        &self.progress
    }

    /// Runs one backup with the settings in `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] or
    /// [`PipelineError::Settings`] before any side effect, and the first
    /// failing step's error otherwise. Cleanup failures after an earlier
    /// error are logged; after an otherwise successful run the first one is
    /// returned.
    pub fn run(&mut self, endpoint: &Endpoint) -> Result<BackupReport, PipelineError> {
        self.config.validate()?;
        let settings = StoreSettings::from_endpoint(endpoint)?;
        let Self {
            config,
            runner,
            archive,
            progress,
        } = self;

        let staging = StagingArea::acquire(config.staging_root());
        let mut guard = None;
        let outcome = stage_and_stream(
            &StepContext {
                config,
                runner,
                settings: &settings,
                archive,
                staging: &staging,
            },
            progress,
            &mut guard,
        );

        let mut cleanups = Vec::with_capacity(2);
        if let Some(armed) = guard {
            cleanups.push(progress.step(
                "Clear snapshot",
                armed.release().map_err(PipelineError::from),
            ));
        }
        cleanups.push(progress.step(
            "Remove staging directory",
            staging.dispose().map_err(PipelineError::from),
        ));
        settle(outcome, cleanups)
    }
}

struct StepContext<'a, 'r, R: ?Sized> {
    config: &'a AgentConfig,
    runner: &'r R,
    settings: &'a StoreSettings,
    archive: &'a ArchiveStream,
    staging: &'a StagingArea,
}

fn stage_and_stream<'r, R, W>(
    ctx: &StepContext<'_, 'r, R>,
    progress: &mut Progress<W>,
    guard: &mut Option<SnapshotGuard<'r, R>>,
) -> Result<BackupReport, PipelineError>
where
    R: ToolRunner + ?Sized,
    W: Write,
{
    let tag = ctx.config.snapshot_name.as_str();
    let staging_root = ctx.staging.root();

    progress.step("Prepare staging directory", ctx.staging.prepare())?;

    let clear = ctx.settings.clear_snapshot_command(tag);
    progress.step(
        "Clean up any stale snapshot",
        invoke(
            ctx.runner,
            &clear,
            &ToolIo::quiet(),
            &ExpectedCodes::success(),
        ),
    )?;
    *guard = Some(SnapshotGuard::arm(ctx.runner, clear));

    let snapshot_taken = ctx
        .settings
        .filter()
        .explicit_keyspaces()
        .is_none_or(|keyspaces| !keyspaces.is_empty());
    if snapshot_taken {
        progress.step(
            "Create new snapshot",
            invoke(
                ctx.runner,
                &ctx.settings.create_snapshot_command(tag),
                &ToolIo::quiet(),
                &ExpectedCodes::success(),
            ),
        )?;
    } else {
        info!("include list is empty after exclusions; skipping snapshot");
    }

    let summary = progress.step(
        "Hard-link snapshot files into staging directory",
        SnapshotLinker::new(&ctx.settings.datadir, staging_root, tag).link(ctx.settings.filter()),
    )?;
    debug!(?summary, "staging tree ready");

    progress.step(
        "Set ownership of staged hard-links",
        assign_service_owner(
            ctx.runner,
            &ctx.config.chown_bin,
            &ctx.config.service_owner,
            staging_root,
        ),
    )?;

    progress.step(
        "Stream tar of staged files",
        write_archive(ctx.runner, &ctx.settings.tar, staging_root, ctx.archive),
    )?;

    Ok(BackupReport {
        summary,
        snapshot_taken,
    })
}
