//! Core library for the `snapstage` backup agent.
//!
//! The crate stages a column-store node's snapshot files into a private
//! hard-link tree and streams it out as a tar archive (backup), or unpacks
//! such an archive and bulk-loads it back into the store (restore). Store
//! control goes through external tools behind the [`ToolRunner`] seam, so
//! both pipelines run unchanged against a scripted runner in tests.

pub mod backup;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod linker;
pub mod logging;
pub mod ownership;
pub mod progress;
pub mod restore;
pub mod staging;
pub mod store;
pub mod test_support;
pub mod tool;
pub mod transport;

pub use backup::{Backup, BackupReport};
pub use config::{AgentConfig, ConfigError};
pub use endpoint::{Endpoint, EndpointError};
pub use error::{FsError, PipelineError};
pub use filter::{KeyspaceFilter, Selection};
pub use linker::{LinkSummary, SnapshotLinker, normalize_table_name};
pub use ownership::Ownership;
pub use progress::Progress;
pub use restore::{Restore, RestoreReport, RestoreStage};
pub use staging::{StagingArea, StagingError};
pub use store::{KeyCheck, SnapshotGuard, StoreSettings, check_endpoint};
pub use tool::{
    ExpectedCodes, ProcessToolRunner, StdinSource, StdoutSink, ToolCommand, ToolError, ToolIo,
    ToolOutput, ToolRunner,
};
pub use transport::ArchiveStream;
