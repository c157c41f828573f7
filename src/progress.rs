//! Operator-facing progress lines.
//!
//! Each pipeline step reports one `✓ label` or `✗ label` line. The lines are
//! diagnostic only and never affect control flow; a failed write is ignored.

use std::io::{self, Write};

const OK_MARK: char = '\u{2713}';
const FAIL_MARK: char = '\u{2717}';

/// Writes step outcomes to a diagnostic stream, stderr by default.
#[derive(Debug)]
pub struct Progress<W: Write = io::Stderr> {
    out: W,
}

impl Progress {
    /// Progress reported on the process's stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::stderr()
    }
}

impl<W: Write> Progress<W> {
    /// Progress reported on `out`.
    #[must_use]
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    /// Reports `label` as succeeded or failed and passes `result` through.
    ///
    /// # Errors
    ///
    /// Returns `result` unchanged.
    pub fn step<T, E>(&mut self, label: &str, result: Result<T, E>) -> Result<T, E> {
        let mark = if result.is_ok() { OK_MARK } else { FAIL_MARK };
        writeln!(self.out, "{mark} {label}").ok();
        result
    }

    /// Borrows the underlying writer.
    #[must_use]
    pub const fn get_ref(&self) -> &W {
        &self.out
    }
}
