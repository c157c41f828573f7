//! Archive transport between the staging tree and the job's byte stream.
//!
//! The archive is a POSIX tar produced and consumed by the external `tar`
//! tool, so bytes flow straight between file descriptors and are never
//! buffered here. On backup the stream is this process's stdout; on restore
//! it is this process's stdin.

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::PipelineError;
use crate::tool::{
    ExpectedCodes, StdinSource, StdoutSink, ToolCommand, ToolIo, ToolRunner, invoke,
};

/// Where the archive bytes go to on backup and come from on restore.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum ArchiveStream {
    /// The process's own stdout (backup) or stdin (restore).
    #[default]
    Stdio,
    /// A file on disk, created on backup and read on restore.
    File(Utf8PathBuf),
}

impl ArchiveStream {
    fn sink(&self) -> StdoutSink {
        match self {
            Self::Stdio => StdoutSink::Inherit,
            Self::File(path) => StdoutSink::File(path.clone()),
        }
    }

    fn source(&self) -> StdinSource {
        match self {
            Self::Stdio => StdinSource::Inherit,
            Self::File(path) => StdinSource::File(path.clone()),
        }
    }
}

/// `tar -c -C {staging} -f - .`
#[must_use]
pub fn create_command(tar: &str, staging: &Utf8Path) -> ToolCommand {
    ToolCommand::new(tar)
        .arg("-c")
        .arg("-C")
        .arg(staging.as_str())
        .arg("-f")
        .arg("-")
        .arg(".")
}

/// `tar -x -C {staging} -f -`
#[must_use]
pub fn extract_command(tar: &str, staging: &Utf8Path) -> ToolCommand {
    ToolCommand::new(tar)
        .arg("-x")
        .arg("-C")
        .arg(staging.as_str())
        .arg("-f")
        .arg("-")
}

/// Streams the staging tree out as a tar archive.
///
/// # Errors
///
/// Returns [`PipelineError::Transport`] when `tar` cannot start, the archive
/// file cannot be created, or `tar` exits non-zero.
pub fn write_archive<R>(
    runner: &R,
    tar: &str,
    staging: &Utf8Path,
    stream: &ArchiveStream,
) -> Result<(), PipelineError>
where
    R: ToolRunner + ?Sized,
{
    invoke(
        runner,
        &create_command(tar, staging),
        &ToolIo::writing_to(stream.sink()),
        &ExpectedCodes::success(),
    )
    .map(drop)
    .map_err(PipelineError::Transport)
}

/// Unpacks an incoming tar archive into the staging tree.
///
/// # Errors
///
/// Returns [`PipelineError::Transport`] when `tar` cannot start, the archive
/// file cannot be opened, or `tar` exits non-zero.
pub fn read_archive<R>(
    runner: &R,
    tar: &str,
    staging: &Utf8Path,
    stream: &ArchiveStream,
) -> Result<(), PipelineError>
where
    R: ToolRunner + ?Sized,
{
    invoke(
        runner,
        &extract_command(tar, staging),
        &ToolIo::reading_from(stream.source()),
        &ExpectedCodes::success(),
    )
    .map(drop)
    .map_err(PipelineError::Transport)
}

#[cfg(test)]
mod tests;
