//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::tool::{ToolCommand, ToolError, ToolIo, ToolOutput, ToolRunner};

/// Scripted tool runner that returns pre-seeded outcomes in FIFO order.
///
/// Used to drive deterministic tool outcomes without spawning processes.
/// Once the script is exhausted every further invocation fails to launch.
#[derive(Clone, Debug, Default)]
pub struct ScriptedToolRunner {
    responses: Rc<RefCell<VecDeque<Result<ToolOutput, ToolError>>>>,
    invocations: Rc<RefCell<Vec<ToolInvocation>>>,
}

/// Records a single invocation made through [`ScriptedToolRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ToolInvocation {
    /// Command as passed to the runner.
    pub command: ToolCommand,
    /// Stream wiring requested by the caller.
    pub io: ToolIo,
}

impl ToolInvocation {
    /// Returns the program name followed by its arguments, space separated.
    ///
    /// Secrets are included; use [`ToolCommand::render`] for the masked form.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.command.arguments().len() + 1);
        parts.push(self.command.program_name().to_owned());
        parts.extend(self.command.arguments().iter().cloned());
        parts.join(" ")
    }
}

impl ScriptedToolRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.borrow().clone()
    }

    /// Returns [`ToolInvocation::command_string`] for every invocation.
    #[must_use]
    pub fn command_strings(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .map(ToolInvocation::command_string)
            .collect()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_exit_code(0);
    }

    /// Pushes `count` successful exit statuses.
    pub fn push_successes(&self, count: usize) {
        for _ in 0..count {
            self.push_success();
        }
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "");
    }

    /// Pushes a response with no exit code to simulate death by signal.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "");
    }

    /// Pushes an explicit output response.
    pub fn push_output(&self, code: Option<i32>, stdout: impl Into<String>) {
        self.responses.borrow_mut().push_back(Ok(ToolOutput {
            code,
            stdout: stdout.into(),
        }));
    }

    /// Pushes a launch failure, as if the binary were missing.
    pub fn push_launch_failure(&self, program: &str) {
        self.responses.borrow_mut().push_back(Err(ToolError::Launch {
            program: program.to_owned(),
            message: String::from("No such file or directory (os error 2)"),
        }));
    }
}

impl ToolRunner for ScriptedToolRunner {
    fn run(&self, command: &ToolCommand, io: &ToolIo) -> Result<ToolOutput, ToolError> {
        self.invocations.borrow_mut().push(ToolInvocation {
            command: command.clone(),
            io: io.clone(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ToolError::Launch {
                    program: command.program().to_owned(),
                    message: String::from("no scripted response available"),
                })
            })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    /// A `None` value removes the variable for the guard's lifetime.
    #[must_use]
    pub fn set_vars(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
