//! Run-and-notify primitive for external commands.
//!
//! The runner knows nothing about profiles. It starts a process group and
//! calls back once, from a waiter thread, when the process exits.

use crate::error::{Error, Result};
use command_group::CommandGroup;
use std::io;
use std::process::{Command, Stdio};
use std::thread;
use tracing::{Level, debug, info, span, warn};

/// Spawns external commands asynchronously.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Creates a runner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Launches `argv` in its own process group with the current environment
    /// and working directory, returning the child's pid.
    ///
    /// `on_finished(success)` is invoked exactly once, on another thread,
    /// when the process exits; `success` is true iff the exit status is zero.
    /// When launching fails the error is returned here and `on_finished` is
    /// never called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`] if `argv` is empty or the process (or its
    /// waiter thread) cannot be started.
    pub fn spawn<F>(&self, argv: &[String], on_finished: F) -> Result<u32>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::Launch {
                program: String::new(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
            });
        };

        let span = span!(Level::DEBUG, "spawn", program = %program);
        let _guard = span.enter();

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .group_spawn()
            .map_err(|source| Error::Launch {
                program: program.clone(),
                source,
            })?;
        let pid = child.id();
        info!(pid, program = %program, args = ?args, "command started");

        let name = program.clone();
        thread::Builder::new()
            .name(format!("autosync-wait-{pid}"))
            .spawn(move || {
                let success = match child.wait() {
                    Ok(status) => {
                        debug!(pid, program = %name, %status, "command exited");
                        status.success()
                    }
                    Err(e) => {
                        warn!(pid, program = %name, error = %e, "failed to wait for command");
                        false
                    }
                };
                on_finished(success);
            })
            .map_err(|source| Error::Launch {
                program: program.clone(),
                source,
            })?;

        Ok(pid)
    }
}
