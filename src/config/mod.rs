//! Agent settings loaded via `ortho-config`.
//!
//! These are the node-wide names the pipeline relies on: where the staging
//! tree lives, which store-side snapshot tag is reused, and which identity
//! owns staged files. They are injected into each run instead of being
//! hard-coded, but concurrent runs on one node still share them, so callers
//! must serialise runs.

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default staging root for the temporary `{keyspace}/{table}` tree.
pub const DEFAULT_STAGING_ROOT: &str = "/var/vcap/store/shield/cassandra";

/// Default tag of the reused store-side snapshot.
pub const DEFAULT_SNAPSHOT_NAME: &str = "shield-backup";

/// Default `user:group` given to staged files before archiving.
pub const DEFAULT_SERVICE_OWNER: &str = "vcap:vcap";

/// Node-wide settings merged from defaults, configuration files and
/// `SNAPSTAGE_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SNAPSTAGE",
    discovery(
        app_name = "snapstage",
        env_var = "SNAPSTAGE_CONFIG_PATH",
        config_file_name = "snapstage.toml",
        dotfile_name = ".snapstage.toml",
        project_file_name = "snapstage.toml"
    )
)]
pub struct AgentConfig {
    /// Absolute path of the staging tree. Removed at the start and end of
    /// every run.
    #[ortho_config(default = DEFAULT_STAGING_ROOT.to_owned())]
    pub staging_root: String,
    /// Tag of the store-side snapshot created and cleared by backups.
    #[ortho_config(default = DEFAULT_SNAPSHOT_NAME.to_owned())]
    pub snapshot_name: String,
    /// `user:group` applied recursively to the staging tree before it is
    /// archived.
    #[ortho_config(default = DEFAULT_SERVICE_OWNER.to_owned())]
    pub service_owner: String,
    /// Path to the `chown` executable.
    #[ortho_config(default = "chown".to_owned())]
    pub chown_bin: String,
    /// Path to the `pgrep` executable used to detect a running store.
    #[ortho_config(default = "pgrep".to_owned())]
    pub pgrep_bin: String,
}

/// Errors raised during settings loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A required setting is blank.
    #[error(
        "missing {field}: set SNAPSTAGE_{env_suffix} or add {field} to snapstage.toml",
        env_suffix = field.to_uppercase()
    )]
    MissingField {
        /// Setting that failed validation.
        field: String,
    },
    /// The staging root is relative or the filesystem root.
    #[error("staging_root must be an absolute path below /: {path}")]
    InvalidStagingRoot {
        /// Offending value.
        path: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

impl AgentConfig {
    /// Loads settings from defaults, configuration files and environment
    /// variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("snapstage")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Ensures every setting is present and the staging root is safe to
    /// delete recursively.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for blank settings and
    /// [`ConfigError::InvalidStagingRoot`] for a relative or root staging
    /// path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_value(&self.staging_root, "staging_root")?;
        Self::require_value(&self.snapshot_name, "snapshot_name")?;
        Self::require_value(&self.service_owner, "service_owner")?;
        Self::require_value(&self.chown_bin, "chown_bin")?;
        Self::require_value(&self.pgrep_bin, "pgrep_bin")?;

        let root = self.staging_root();
        if !root.is_absolute() || root.parent().is_none() {
            return Err(ConfigError::InvalidStagingRoot {
                path: self.staging_root.clone(),
            });
        }
        Ok(())
    }

    /// Staging root as a path.
    #[must_use]
    pub fn staging_root(&self) -> &Utf8Path {
        Utf8Path::new(&self.staging_root)
    }

    /// Settings identical to the defaults except for the staging root.
    #[must_use]
    pub fn with_staging_root(staging_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into().into_string(),
            snapshot_name: DEFAULT_SNAPSHOT_NAME.to_owned(),
            service_owner: DEFAULT_SERVICE_OWNER.to_owned(),
            chown_bin: String::from("chown"),
            pgrep_bin: String::from("pgrep"),
        }
    }

    fn require_value(value: &str, field: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: field.to_owned(),
            });
        }
        Ok(())
    }
}
