//! Errors surfaced by the backup and restore pipelines.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::config::ConfigError;
use crate::endpoint::EndpointError;
use crate::staging::StagingError;
use crate::tool::ToolError;

/// A failed stat, walk, link, chown or removal.
#[derive(Debug, Error)]
#[error("failed to {action} {path}: {source}")]
pub struct FsError {
    /// What the pipeline was doing, e.g. `hard-link`.
    pub action: &'static str,
    /// Path the operation was applied to.
    pub path: Utf8PathBuf,
    /// Underlying filesystem error.
    #[source]
    pub source: io::Error,
}

impl FsError {
    /// Wraps `source` with the action and path it relates to.
    #[must_use]
    pub fn new(action: &'static str, path: &Utf8Path, source: io::Error) -> Self {
        Self {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Errors that abort a backup or restore run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing or invalid endpoint value. Raised before any side effect.
    #[error("configuration error: {0}")]
    Configuration(#[from] EndpointError),
    /// Invalid agent settings. Raised before any side effect.
    #[error("agent settings error: {0}")]
    Settings(#[from] ConfigError),
    /// The staging path could not be cleared, created or removed.
    #[error(transparent)]
    Staging(#[from] StagingError),
    /// The node is not in the state a restore requires.
    #[error("precondition failed: {message}")]
    Precondition {
        /// Human-readable description of the unmet precondition.
        message: String,
    },
    /// A control tool could not run or exited unexpectedly.
    #[error(transparent)]
    Tool(#[from] ToolError),
    /// A filesystem operation failed.
    #[error(transparent)]
    Filesystem(#[from] FsError),
    /// Writing or reading the archive stream failed.
    #[error("archive transport failed: {0}")]
    Transport(#[source] ToolError),
}

impl PipelineError {
    /// Builds a [`PipelineError::Precondition`].
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }
}

/// Combines the outcome of the forward steps with the outcomes of the
/// cleanup steps that followed.
///
/// A forward failure wins: cleanup failures are only logged. After a
/// successful run the first cleanup failure is returned.
pub(crate) fn settle<T>(
    outcome: Result<T, PipelineError>,
    cleanups: Vec<Result<(), PipelineError>>,
) -> Result<T, PipelineError> {
    match outcome {
        Ok(value) => {
            for cleanup in cleanups {
                cleanup?;
            }
            Ok(value)
        }
        Err(err) => {
            for cleanup in cleanups {
                if let Err(cleanup_err) = cleanup {
                    warn!(error = %cleanup_err, original = %err, "cleanup failed after an earlier error");
                }
            }
            Err(err)
        }
    }
}
