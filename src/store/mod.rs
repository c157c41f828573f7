//! Data-store control surface: endpoint keys, command lines and the
//! store-side snapshot guard.
//!
//! Every interaction with the store goes through its own tools: `nodetool`
//! creates and clears the tagged snapshot, `sstableloader` streams a staged
//! table back into the running cluster, and `pgrep` tells whether the daemon
//! is up. The filesystem layer never addresses a snapshot directly.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::endpoint::{Endpoint, EndpointError};
use crate::filter::{DEFAULT_EXCLUDED_KEYSPACES, KeyspaceFilter};
use crate::tool::{ExpectedCodes, ToolCommand, ToolError, ToolIo, ToolRunner, invoke};

/// Endpoint key of the node address handed to `sstableloader -d`.
pub const HOST_KEY: &str = "cassandra_host";
/// Endpoint key of the native transport port.
pub const PORT_KEY: &str = "cassandra_port";
/// Endpoint key of the bulk-load user.
pub const USER_KEY: &str = "cassandra_user";
/// Endpoint key of the bulk-load password.
pub const PASSWORD_KEY: &str = "cassandra_password";
/// Endpoint key of the explicit keyspace include list.
pub const INCLUDE_KEY: &str = "cassandra_include_keyspaces";
/// Endpoint key of the keyspace exclude list.
pub const EXCLUDE_KEY: &str = "cassandra_exclude_keyspaces";
/// Endpoint key of the directory holding `nodetool` and `sstableloader`.
pub const BINDIR_KEY: &str = "cassandra_bindir";
/// Endpoint key of the live data directory.
pub const DATADIR_KEY: &str = "cassandra_datadir";
/// Endpoint key of the `tar` executable.
pub const TAR_KEY: &str = "cassandra_tar";
/// Endpoint key of the `pgrep -f` pattern identifying the store daemon.
pub const PROCESS_PATTERN_KEY: &str = "cassandra_process_pattern";

/// Default node address.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default native transport port.
pub const DEFAULT_PORT: &str = "9042";
/// Default bulk-load user.
pub const DEFAULT_USER: &str = "cassandra";
/// Default bulk-load password.
pub const DEFAULT_PASSWORD: &str = "cassandra";
/// Default tool directory.
pub const DEFAULT_BINDIR: &str = "/var/vcap/packages/cassandra/bin";
/// Default live data directory.
pub const DEFAULT_DATADIR: &str = "/var/vcap/store/cassandra/data";
/// Default `tar` executable.
pub const DEFAULT_TAR: &str = "tar";
/// Default daemon pattern.
pub const DEFAULT_PROCESS_PATTERN: &str = "CassandraDaemon";

const REDACTED: &str = "********";

/// Store connection and layout settings resolved from one endpoint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoreSettings {
    /// Node address for bulk loading.
    pub host: String,
    /// Native transport port.
    pub port: u16,
    /// Bulk-load user.
    pub user: String,
    /// Bulk-load password. Never logged.
    pub password: String,
    /// Directory holding `nodetool` and `sstableloader`.
    pub bindir: Utf8PathBuf,
    /// Live data directory.
    pub datadir: Utf8PathBuf,
    /// `tar` executable.
    pub tar: String,
    /// `pgrep -f` pattern identifying the store daemon.
    pub process_pattern: String,
    filter: KeyspaceFilter,
}

impl StoreSettings {
    /// Reads every store key, applying defaults for absent ones.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::WrongType`] for values of the wrong shape
    /// (including a port that is not a number) and [`EndpointError::Empty`]
    /// for blank values.
    pub fn from_endpoint(endpoint: &Endpoint) -> Result<Self, EndpointError> {
        Ok(Self {
            host: required(endpoint, HOST_KEY, DEFAULT_HOST)?,
            port: port(endpoint)?,
            user: required(endpoint, USER_KEY, DEFAULT_USER)?,
            password: required(endpoint, PASSWORD_KEY, DEFAULT_PASSWORD)?,
            bindir: required(endpoint, BINDIR_KEY, DEFAULT_BINDIR)?.into(),
            datadir: required(endpoint, DATADIR_KEY, DEFAULT_DATADIR)?.into(),
            tar: required(endpoint, TAR_KEY, DEFAULT_TAR)?,
            process_pattern: required(endpoint, PROCESS_PATTERN_KEY, DEFAULT_PROCESS_PATTERN)?,
            filter: keyspace_filter(endpoint)?,
        })
    }

    /// Keyspace selection for this run.
    #[must_use]
    pub const fn filter(&self) -> &KeyspaceFilter {
        &self.filter
    }

    /// `nodetool clearsnapshot -t {tag}`.
    #[must_use]
    pub fn clear_snapshot_command(&self, tag: &str) -> ToolCommand {
        ToolCommand::new(self.tool_path("nodetool"))
            .arg("clearsnapshot")
            .arg("-t")
            .arg(tag)
    }

    /// `nodetool snapshot -t {tag} [keyspace...]`, naming keyspaces only when
    /// the include list is explicit.
    #[must_use]
    pub fn create_snapshot_command(&self, tag: &str) -> ToolCommand {
        let command = ToolCommand::new(self.tool_path("nodetool"))
            .arg("snapshot")
            .arg("-t")
            .arg(tag);
        match self.filter.explicit_keyspaces() {
            Some(keyspaces) => command.args(keyspaces),
            None => command,
        }
    }

    /// `sstableloader -u {user} -pw {password} -d {host} -p {port} {table_dir}`.
    #[must_use]
    pub fn bulk_load_command(&self, table_dir: &Utf8Path) -> ToolCommand {
        ToolCommand::new(self.tool_path("sstableloader"))
            .arg("-u")
            .arg(self.user.as_str())
            .arg("-pw")
            .secret_arg(self.password.as_str())
            .arg("-d")
            .arg(self.host.as_str())
            .arg("-p")
            .arg(self.port.to_string())
            .arg(table_dir.as_str())
    }

    /// `pgrep -f {pattern}`.
    #[must_use]
    pub fn process_probe_command(&self, pgrep_bin: &str) -> ToolCommand {
        ToolCommand::new(pgrep_bin)
            .arg("-f")
            .arg(self.process_pattern.as_str())
    }

    fn tool_path(&self, tool: &str) -> String {
        self.bindir.join(tool).into_string()
    }
}

fn required(endpoint: &Endpoint, key: &str, default: &str) -> Result<String, EndpointError> {
    let value = endpoint.string_value_or(key, default)?;
    if value.trim().is_empty() {
        return Err(EndpointError::Empty {
            key: key.to_owned(),
        });
    }
    Ok(value)
}

fn port(endpoint: &Endpoint) -> Result<u16, EndpointError> {
    required(endpoint, PORT_KEY, DEFAULT_PORT)?
        .trim()
        .parse::<u16>()
        .map_err(|_| EndpointError::WrongType {
            key: PORT_KEY.to_owned(),
            expected: "a TCP port number",
        })
}

fn keyspace_filter(endpoint: &Endpoint) -> Result<KeyspaceFilter, EndpointError> {
    let include = endpoint.optional_string_list(INCLUDE_KEY)?;
    let exclude = endpoint.string_list_value_or(EXCLUDE_KEY, &DEFAULT_EXCLUDED_KEYSPACES)?;
    Ok(KeyspaceFilter::new(include, exclude))
}

/// Reports whether the store daemon is running.
///
/// # Errors
///
/// Returns [`ToolError`] when `pgrep` cannot start or exits with anything
/// other than 0 (running) or 1 (not running).
pub fn is_store_running<R>(
    runner: &R,
    settings: &StoreSettings,
    pgrep_bin: &str,
) -> Result<bool, ToolError>
where
    R: ToolRunner + ?Sized,
{
    let output = invoke(
        runner,
        &settings.process_probe_command(pgrep_bin),
        &ToolIo::quiet(),
        &ExpectedCodes::of([0, 1]),
    )?;
    Ok(output.code == Some(0))
}

/// Clears the tagged store-side snapshot exactly once.
///
/// [`SnapshotGuard::release`] reports the outcome to the caller. A guard
/// dropped without release still clears the snapshot and logs a failure.
pub struct SnapshotGuard<'r, R: ToolRunner + ?Sized> {
    runner: &'r R,
    command: ToolCommand,
    released: bool,
}

impl<'r, R: ToolRunner + ?Sized> SnapshotGuard<'r, R> {
    /// Arms a guard that runs `clear_command` on release or drop.
    #[must_use]
    pub const fn arm(runner: &'r R, clear_command: ToolCommand) -> Self {
        Self {
            runner,
            command: clear_command,
            released: false,
        }
    }

    /// Clears the snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when `nodetool clearsnapshot` fails.
    pub fn release(mut self) -> Result<(), ToolError> {
        self.released = true;
        self.clear()
    }

    fn clear(&self) -> Result<(), ToolError> {
        debug!(command = %self.command.render(), "clearing store-side snapshot");
        invoke(
            self.runner,
            &self.command,
            &ToolIo::quiet(),
            &ExpectedCodes::success(),
        )
        .map(drop)
    }
}

impl<R: ToolRunner + ?Sized> Drop for SnapshotGuard<'_, R> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.clear() {
            warn!(error = %err, "failed to clear store-side snapshot on drop");
        }
    }
}

impl<R: ToolRunner + ?Sized> fmt::Debug for SnapshotGuard<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotGuard")
            .field("command", &self.command.render())
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

/// Outcome of checking one endpoint key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyCheck {
    /// Endpoint key.
    pub key: &'static str,
    /// Description of the effective value, or why it is invalid.
    pub outcome: Result<String, EndpointError>,
}

impl fmt::Display for KeyCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Ok(detail) => write!(f, "\u{2713} {:<28} {detail}", self.key),
            Err(err) => write!(f, "\u{2717} {:<28} {err}", self.key),
        }
    }
}

/// Checks every store key of `endpoint` and describes its effective value.
///
/// The password is never echoed.
#[must_use]
pub fn check_endpoint(endpoint: &Endpoint) -> Vec<KeyCheck> {
    let scalar = |key: &'static str, default: &str, secret: bool| {
        let outcome = required(endpoint, key, default).map(|value| {
            let shown = if secret { REDACTED } else { value.as_str() };
            if endpoint.contains(key) {
                shown.to_owned()
            } else {
                format!("using default {shown}")
            }
        });
        KeyCheck { key, outcome }
    };

    let port_check = KeyCheck {
        key: PORT_KEY,
        outcome: port(endpoint).map(|value| {
            if endpoint.contains(PORT_KEY) {
                value.to_string()
            } else {
                format!("using default {value}")
            }
        }),
    };
    let include = KeyCheck {
        key: INCLUDE_KEY,
        outcome: endpoint
            .optional_string_list(INCLUDE_KEY)
            .map(|names| match names {
                Some(list) if !list.is_empty() => format!("[{}]", list.join(" ")),
                _ => String::from("backing up all keyspaces"),
            }),
    };
    let exclude = KeyCheck {
        key: EXCLUDE_KEY,
        outcome: endpoint
            .string_list_value_or(EXCLUDE_KEY, &DEFAULT_EXCLUDED_KEYSPACES)
            .map(|list| {
                let filter = KeyspaceFilter::new(None, list);
                let excluded: Vec<&str> = filter.excluded().iter().map(String::as_str).collect();
                if excluded.is_empty() {
                    String::from("excluding no keyspaces")
                } else {
                    format!("[{}]", excluded.join(" "))
                }
            }),
    };

    vec![
        scalar(HOST_KEY, DEFAULT_HOST, false),
        port_check,
        scalar(USER_KEY, DEFAULT_USER, false),
        scalar(PASSWORD_KEY, DEFAULT_PASSWORD, true),
        include,
        exclude,
        scalar(BINDIR_KEY, DEFAULT_BINDIR, false),
        scalar(DATADIR_KEY, DEFAULT_DATADIR, false),
        scalar(TAR_KEY, DEFAULT_TAR, false),
        scalar(PROCESS_PATTERN_KEY, DEFAULT_PROCESS_PATTERN, false),
    ]
}
