//! Command-line interface definitions for the `snapstage` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Environment variable that may carry the endpoint JSON instead of
/// `--endpoint`.
pub(crate) const ENDPOINT_ENV: &str = "SNAPSTAGE_ENDPOINT";

/// Top-level CLI for the `snapstage` binary.
#[derive(Debug, Parser)]
#[command(
    name = "snapstage",
    version,
    about = "Stage column-store snapshots and stream them as tar archives",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log every executed command and filter decision to stderr.
    #[arg(long, global = true)]
    pub(crate) debug: bool,
    /// Operation to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Operations exposed by the binary.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Snapshot the node and write a tar archive of the selected keyspaces.
    #[command(name = "backup")]
    Backup(PipelineArgs),
    /// Load a tar archive back into a stopped node.
    #[command(name = "restore")]
    Restore(PipelineArgs),
    /// Check the endpoint configuration and print one line per key.
    #[command(name = "validate")]
    Validate(EndpointArgs),
}

/// Endpoint configuration shared by every subcommand.
#[derive(Debug, Args)]
pub(crate) struct EndpointArgs {
    /// Endpoint configuration as a JSON object, e.g.
    /// `{"cassandra_datadir": "/var/lib/cassandra/data"}`. Keys that are
    /// absent take their defaults.
    #[arg(long, env = ENDPOINT_ENV, value_name = "JSON", default_value = "{}")]
    pub(crate) endpoint: String,
}

/// Arguments for `backup` and `restore`.
#[derive(Debug, Args)]
pub(crate) struct PipelineArgs {
    /// Endpoint configuration.
    #[command(flatten)]
    pub(crate) endpoint: EndpointArgs,
    /// Write the archive to PATH (backup) or read it from PATH (restore)
    /// instead of stdout or stdin.
    #[arg(long, value_name = "PATH")]
    pub(crate) archive: Option<String>,
}
