//! Binary entry point for the `snapstage` CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing::info;

use snapstage::{
    AgentConfig, ArchiveStream, Backup, Endpoint, EndpointError, PipelineError, ProcessToolRunner,
    Restore, check_endpoint, logging,
};

mod cli;

use cli::{Cli, Command, EndpointArgs, PipelineArgs};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to write report: {0}")]
    Output(#[from] io::Error),
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.debug);
    let exit_code = match dispatch(cli.command) {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn dispatch(command: Command) -> Result<(), CliError> {
    match command {
        Command::Backup(args) => run_backup(args),
        Command::Restore(args) => run_restore(args),
        Command::Validate(args) => run_validate(&args, io::stdout().lock()),
    }
}

fn load_config() -> Result<AgentConfig, CliError> {
    AgentConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))
}

fn archive_stream(archive: Option<String>) -> ArchiveStream {
    archive.map_or(ArchiveStream::Stdio, |path| {
        ArchiveStream::File(Utf8PathBuf::from(path))
    })
}

fn run_backup(args: PipelineArgs) -> Result<(), CliError> {
    let endpoint = Endpoint::from_json(&args.endpoint.endpoint)?;
    let config = load_config()?;
    let report = Backup::new(config, ProcessToolRunner)
        .with_archive(archive_stream(args.archive))
        .run(&endpoint)?;
    info!(
        keyspaces = report.summary.keyspaces,
        tables = report.summary.tables,
        files = report.summary.files,
        "backup complete"
    );
    Ok(())
}

fn run_restore(args: PipelineArgs) -> Result<(), CliError> {
    let endpoint = Endpoint::from_json(&args.endpoint.endpoint)?;
    let config = load_config()?;
    let report = Restore::new(config, ProcessToolRunner)
        .with_archive(archive_stream(args.archive))
        .run(&endpoint)?;
    info!(tables = report.tables_loaded, "restore complete");
    Ok(())
}

fn run_validate(args: &EndpointArgs, mut out: impl Write) -> Result<(), CliError> {
    let endpoint = Endpoint::from_json(&args.endpoint)?;
    let checks = check_endpoint(&endpoint);
    for check in &checks {
        writeln!(out, "{check}")?;
    }
    if checks.iter().any(|check| check.outcome.is_err()) {
        return Err(EndpointError::Invalid.into());
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "error: {err}").ok();
}
