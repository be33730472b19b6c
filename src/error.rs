//! Error type shared by the orchestration core.
//!
//! None of these are fatal to the daemon: the scheduler turns them into a
//! profile `State::Error` or a log line and keeps going.

use std::io;
use std::path::PathBuf;

/// Failures raised by the watcher, the runner and the profile model.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The external command could not be started at all.
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        /// Program that was being started.
        program: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The profile already has a command in flight.
    #[error("profile `{0}` already has a command running")]
    SpawnRejected(String),

    /// A profile definition violates the root-count rule or similar.
    #[error("profile `{name}` is invalid: {reason}")]
    InvalidProfile {
        /// Canonical profile name.
        name: String,
        /// Human-readable reason.
        reason: String,
    },

    /// A directory could not be subscribed to.
    #[error("cannot watch {}: {reason}", path.display())]
    Watch {
        /// Directory that was being watched.
        path: PathBuf,
        /// Backend error message.
        reason: String,
    },

    /// A command template could not be parsed.
    #[error("invalid command `{template}`: {reason}")]
    Command {
        /// The template as written in the config file.
        template: String,
        /// Parse failure.
        reason: String,
    },
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
