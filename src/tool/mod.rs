//! External tool invocation with exit-code contracts.
//!
//! Every data-store control operation (`nodetool`, `sstableloader`), the
//! ownership fix-up (`chown`), the liveness probe (`pgrep`) and the archive
//! transport (`tar`) run through the [`ToolRunner`] abstraction. The runner
//! only reports what happened; [`invoke`] decides whether the exit code
//! honours the caller's contract.

use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::debug;

const REDACTED: &str = "********";

/// A program plus its arguments, rendered for logs with secrets masked.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    secret_args: BTreeSet<usize>,
}

impl ToolCommand {
    /// Starts a command line for `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            secret_args: BTreeSet::new(),
        }
    }

    /// Appends a single argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Appends every argument from `values`.
    #[must_use]
    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Appends an argument that must never appear in rendered output.
    #[must_use]
    pub fn secret_arg(mut self, value: impl Into<String>) -> Self {
        self.secret_args.insert(self.args.len());
        self.args.push(value.into());
        self
    }

    /// Program to execute.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments passed to the program, secrets included.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Returns the final path component of the program, e.g. `nodetool`
    /// for `/var/vcap/packages/cassandra/bin/nodetool`.
    #[must_use]
    pub fn program_name(&self) -> &str {
        Utf8Path::new(&self.program)
            .file_name()
            .unwrap_or(self.program.as_str())
    }

    /// Renders a shell-escaped command line suitable for diagnostics.
    #[must_use]
    pub fn render(&self) -> String {
        let mut rendered = escape(self.program.as_str().into()).into_owned();
        for (index, arg) in self.args.iter().enumerate() {
            rendered.push(' ');
            if self.secret_args.contains(&index) {
                rendered.push_str(REDACTED);
            } else {
                rendered.push_str(escape(arg.as_str().into()).as_ref());
            }
        }
        rendered
    }
}

/// Where a child process reads its standard input from.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum StdinSource {
    /// Share this process's stdin (archive ingestion from the transport layer).
    Inherit,
    /// Give the child an empty stdin.
    #[default]
    Null,
    /// Read from an existing file.
    File(Utf8PathBuf),
}

/// Where a child process writes its standard output to.
///
/// On backup this process's stdout *is* the archive stream, so control tools
/// must never inherit it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum StdoutSink {
    /// Share this process's stdout (archive emission to the transport layer).
    Inherit,
    /// Discard the child's output.
    #[default]
    Null,
    /// Capture the output into [`ToolOutput::stdout`].
    Capture,
    /// Create or truncate a file and write into it.
    File(Utf8PathBuf),
}

/// Standard stream wiring for one invocation. Stderr is always inherited so
/// tool diagnostics reach the operator.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ToolIo {
    /// Source of the child's stdin.
    pub stdin: StdinSource,
    /// Destination of the child's stdout.
    pub stdout: StdoutSink,
}

impl ToolIo {
    /// Empty stdin, discarded stdout.
    #[must_use]
    pub const fn quiet() -> Self {
        Self {
            stdin: StdinSource::Null,
            stdout: StdoutSink::Null,
        }
    }

    /// Empty stdin, stdout sent to `sink`.
    #[must_use]
    pub const fn writing_to(sink: StdoutSink) -> Self {
        Self {
            stdin: StdinSource::Null,
            stdout: sink,
        }
    }

    /// Stdin read from `source`, discarded stdout.
    #[must_use]
    pub const fn reading_from(source: StdinSource) -> Self {
        Self {
            stdin: source,
            stdout: StdoutSink::Null,
        }
    }
}

/// Exit codes an invocation is allowed to finish with.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExpectedCodes(BTreeSet<i32>);

impl ExpectedCodes {
    /// Only a zero exit code is acceptable.
    #[must_use]
    pub fn success() -> Self {
        Self::of([0])
    }

    /// Accepts any of the given exit codes.
    #[must_use]
    pub fn of(codes: impl IntoIterator<Item = i32>) -> Self {
        Self(codes.into_iter().collect())
    }

    /// Termination by signal (no exit code) is never expected.
    #[must_use]
    pub fn contains(&self, code: Option<i32>) -> bool {
        code.is_some_and(|value| self.0.contains(&value))
    }
}

impl Default for ExpectedCodes {
    fn default() -> Self {
        Self::success()
    }
}

/// Result of running an external tool.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ToolOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output; empty unless [`StdoutSink::Capture`] was used.
    pub stdout: String,
}

/// Errors raised while launching or supervising an external tool.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ToolError {
    /// The program could not be started (missing binary, permissions).
    #[error("failed to launch {program}: {message}")]
    Launch {
        /// Program that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// A stdin or stdout redirection target could not be opened.
    #[error("failed to open {path} for {program}: {message}")]
    Redirect {
        /// Program the redirection was meant for.
        program: String,
        /// File that could not be opened.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// The program finished with an exit code outside the expected set.
    #[error("`{command}` exited with status {status_text}")]
    Execution {
        /// Rendered command line, secrets masked.
        command: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
    },
}

/// Abstraction over process execution to support fakes in tests.
pub trait ToolRunner {
    /// Runs `command` to completion with the requested stream wiring.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Launch`] when the process cannot be started and
    /// [`ToolError::Redirect`] when a redirection target cannot be opened.
    fn run(&self, command: &ToolCommand, io: &ToolIo) -> Result<ToolOutput, ToolError>;
}

/// Real runner that spawns host processes and blocks until they exit.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessToolRunner;

impl ToolRunner for ProcessToolRunner {
    fn run(&self, command: &ToolCommand, io: &ToolIo) -> Result<ToolOutput, ToolError> {
        let mut child = Command::new(command.program());
        child
            .args(command.arguments())
            .stdin(stdin_for(command, &io.stdin)?)
            .stderr(Stdio::inherit());

        let launch_error = |err: io::Error| ToolError::Launch {
            program: command.program().to_owned(),
            message: err.to_string(),
        };

        if io.stdout == StdoutSink::Capture {
            let output = child
                .stdout(Stdio::piped())
                .output()
                .map_err(launch_error)?;
            return Ok(ToolOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            });
        }

        let status = child
            .stdout(stdout_for(command, &io.stdout)?)
            .status()
            .map_err(launch_error)?;
        Ok(ToolOutput {
            code: status.code(),
            stdout: String::new(),
        })
    }
}

fn stdin_for(command: &ToolCommand, source: &StdinSource) -> Result<Stdio, ToolError> {
    match source {
        StdinSource::Inherit => Ok(Stdio::inherit()),
        StdinSource::Null => Ok(Stdio::null()),
        StdinSource::File(path) => File::open(path)
            .map(Stdio::from)
            .map_err(|err| redirect_error(command, path, &err)),
    }
}

fn stdout_for(command: &ToolCommand, sink: &StdoutSink) -> Result<Stdio, ToolError> {
    match sink {
        StdoutSink::Inherit => Ok(Stdio::inherit()),
        StdoutSink::Null => Ok(Stdio::null()),
        StdoutSink::Capture => Ok(Stdio::piped()),
        StdoutSink::File(path) => File::create(path)
            .map(Stdio::from)
            .map_err(|err| redirect_error(command, path, &err)),
    }
}

fn redirect_error(command: &ToolCommand, path: &Utf8Path, err: &io::Error) -> ToolError {
    ToolError::Redirect {
        program: command.program().to_owned(),
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// Runs `command` once and enforces the `expected` exit-code contract.
///
/// No retries are attempted.
///
/// # Errors
///
/// Propagates launch failures from the runner, and returns
/// [`ToolError::Execution`] when the exit code is not in `expected`.
pub fn invoke<R>(
    runner: &R,
    command: &ToolCommand,
    io: &ToolIo,
    expected: &ExpectedCodes,
) -> Result<ToolOutput, ToolError>
where
    R: ToolRunner + ?Sized,
{
    let rendered = command.render();
    debug!(command = %rendered, "executing");
    let output = runner.run(command, io)?;
    if expected.contains(output.code) {
        return Ok(output);
    }

    let status_text = output
        .code
        .map_or_else(|| String::from("unknown"), |code| code.to_string());
    Err(ToolError::Execution {
        command: rendered,
        status: output.code,
        status_text,
    })
}
