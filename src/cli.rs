//! Command-line interface definitions for autosync.
//!
//! The CLI definitions are shared between the main binary and build tools
//! (like xtask) for man page generation.
//!
//! Note: Field-level documentation is provided via clap attributes, so we
//! allow missing_docs for this module to avoid redundant documentation.

#![allow(missing_docs)]

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Main CLI structure for autosync.
#[derive(Parser)]
#[command(
    name = "autosync",
    version = crate::VERSION,
    about = "Runs your file synchronizer when watched directories change",
    long_about = "Watches the local roots of Unison-style profiles and syncs each profile \
                  once its changes settle, never running overlapping profiles at once"
)]
pub struct Cli {
    /// Subcommand to execute; `run` when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file
    #[arg(short, long, global = true, env = crate::CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// All available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon in the foreground
    ///
    /// Reads commands from stdin: sync <profile>, edit, pause, resume,
    /// reload, status, quit.
    Run,

    /// List the profiles that would be loaded and which of them overlap
    Profiles,

    /// Check the configuration, the commands and the network probe
    Check,

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
