//! Diagnostic logging setup.
//!
//! Log records go to stderr only: on backup, stdout carries the archive.

use std::io;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding an `EnvFilter` directive, e.g. `snapstage=debug`.
pub const LOG_ENV: &str = "SNAPSTAGE_LOG";

/// Level used when [`LOG_ENV`] is unset or invalid.
pub const DEFAULT_DIRECTIVE: &str = "warn";

/// Builds the filter for this run. `debug` overrides the environment.
#[must_use]
pub fn filter(debug: bool) -> EnvFilter {
    if debug {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init(debug: bool) {
    let installed = tracing_subscriber::registry()
        .with(filter(debug))
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .try_init();
    if installed.is_err() {
        tracing::debug!("logging already initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    use crate::test_support::EnvGuard;

    #[rstest]
    fn debug_flag_overrides_environment() {
        let _guard = EnvGuard::set_vars(&[(LOG_ENV, Some("error"))]);

        assert_eq!(filter(true).to_string(), "debug");
        assert_eq!(filter(false).to_string(), "error");
    }

    #[rstest]
    fn unset_environment_falls_back_to_warn() {
        let _guard = EnvGuard::set_vars(&[(LOG_ENV, None)]);

        assert_eq!(filter(false).to_string(), DEFAULT_DIRECTIVE);
    }
}
