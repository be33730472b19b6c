#![warn(missing_docs)]
// Allow pedantic strict lints that create false positives in this codebase
#![allow(clippy::arithmetic_side_effects)] // Instant + Duration on configured intervals
#![allow(clippy::float_arithmetic)] // Settle jitter

//! # Autosync - Change-Driven Sync Daemon
//!
//! Autosync watches the local directories of file-synchronizer profiles and
//! runs the synchronizer once changes have settled, while keeping profiles
//! that share directories from running at the same time.
//!
//! ## Architecture
//!
//! - [`watch`]: per-profile recursive directory watch trees over a
//!   non-recursive notification backend
//! - [`profile`]: profile definitions and the per-profile state machine
//! - [`scheduler`]: owner of every live profile; serializes overlapping
//!   syncs and reacts to network, pause and reload
//! - [`runner`]: asynchronous process launching with exit callbacks
//! - [`daemon`]: the controller thread and its event sources
//! - [`config`]: TOML settings and `.prf` profile loading
//!
//! ## Example Usage
//!
//! ```no_run
//! use autosync::AutosyncContext;
//!
//! # fn main() -> anyhow::Result<()> {
//! let ctx = AutosyncContext::new(None)?;
//! autosync::daemon::run(&ctx)?;
//! # Ok(())
//! # }
//! ```

/// Command-line interface definitions (argument parsing structures).
pub mod cli;

/// Subcommand implementations.
pub mod commands;

/// Command templates for the external synchronizer.
pub mod command;

/// Configuration parsing, validation and profile loading.
pub mod config;

/// The controller loop and its event sources.
pub mod daemon;

/// Error type for the orchestration core.
pub mod error;

/// Single-instance locking.
pub mod lock;

/// Network availability probing.
pub mod network;

/// Status output.
pub mod presentation;

/// Profile definitions and live profile state.
pub mod profile;

/// Asynchronous process launching.
pub mod runner;

/// The profile scheduler.
pub mod scheduler;

/// Profile and aggregate states.
pub mod state;

/// Utility functions and helpers.
pub mod utils;

/// Directory watch trees.
pub mod watch;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::warn;

/// Current version of the autosync binary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file path relative to home directory.
pub const DEFAULT_CONFIG_PATH: &str = ".config/autosync/config.toml";

/// Environment variable overriding the configuration file path.
pub const CONFIG_ENV: &str = "AUTOSYNC_CONFIG_PATH";

/// Name of the instance lock file, kept next to the configuration file.
pub const LOCK_FILE: &str = "autosync.lock";

/// Loaded configuration plus where it came from.
///
/// # Examples
///
/// ```no_run
/// use autosync::AutosyncContext;
///
/// # fn main() -> anyhow::Result<()> {
/// // Default path, or $AUTOSYNC_CONFIG_PATH
/// let ctx = AutosyncContext::new(None)?;
///
/// // Explicit path (for testing)
/// let ctx = AutosyncContext::new(Some("/tmp/autosync/config.toml".into()))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AutosyncContext {
    /// Path to the configuration file.
    pub config_path: PathBuf,

    /// Loaded configuration settings.
    pub config: config::Config,
}

impl AutosyncContext {
    /// Loads the configuration from `config_path`, falling back to
    /// `$AUTOSYNC_CONFIG_PATH` and then `~/.config/autosync/config.toml`.
    /// A missing file is created with defaults.
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined or if the
    /// configuration file cannot be read, created or validated.
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => match std::env::var(CONFIG_ENV) {
                Ok(path) => PathBuf::from(path),
                Err(_) => dirs::home_dir()
                    .context("Could not find home directory")?
                    .join(DEFAULT_CONFIG_PATH),
            },
        };

        let config = config::Config::load(&config_path)?;

        // Unknown keys are worth a warning, never a failure
        let validator = config::validator::ConfigValidator::new();
        if let Err(e) = validator.validate_config_file(&config_path) {
            warn!(error = %e, "configuration validation failed");
        }

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Where the instance lock lives.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.config_path
            .parent()
            .map_or_else(|| PathBuf::from(LOCK_FILE), |dir| dir.join(LOCK_FILE))
    }

    /// Profile directory with `~` expanded.
    ///
    /// # Errors
    /// Returns an error if the home or current directory cannot be determined.
    pub fn profile_dir(&self) -> Result<PathBuf> {
        self.config.profile_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_context_creates_config_and_locates_lock() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("autosync/config.toml");

        let ctx = AutosyncContext::new(Some(path.clone())).unwrap();
        assert!(path.exists());
        assert_eq!(ctx.lock_path(), temp.path().join("autosync").join(LOCK_FILE));
    }

    #[test]
    fn test_context_rejects_invalid_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[core]\nsettle_interval = \"0s\"\n").unwrap();
        assert!(AutosyncContext::new(Some(path)).is_err());
    }
}
