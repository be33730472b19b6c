//! Command templates for the external synchronizer.
//!
//! Templates are written shell-style in the config file
//! (`unison {profile} -batch`) and expanded into an argument vector per run.

use crate::error::{Error, Result};
use tracing::{Level, debug, span};

/// Placeholder replaced by the profile's canonical name.
pub const PROFILE_PLACEHOLDER: &str = "{profile}";

/// How a profile-scoped command is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Non-interactive sync triggered by settled changes.
    Batch,
    /// Interactive sync requested by the user.
    Manual,
}

/// A parsed command line with optional `{profile}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    source: String,
    argv: Vec<String>,
}

impl CommandTemplate {
    /// Parses a shell-style command string.
    ///
    /// Handles the usual quoting (`'a b'`, `"a b"`, `a\ b`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Command`] for unbalanced quotes or an empty command.
    pub fn parse(source: &str) -> Result<Self> {
        let span = span!(Level::DEBUG, "parse_command", source);
        let _guard = span.enter();

        let argv = shell_words::split(source).map_err(|e| Error::Command {
            template: source.to_string(),
            reason: e.to_string(),
        })?;
        if argv.is_empty() {
            return Err(Error::Command {
                template: source.to_string(),
                reason: "empty command".to_string(),
            });
        }

        debug!(program = %argv[0], args = ?&argv[1..], "command parsed");
        Ok(Self {
            source: source.to_string(),
            argv,
        })
    }

    /// The template as written.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Program name (first word).
    #[must_use]
    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    /// Argument vector with `{profile}` replaced by `profile`. Without a
    /// profile the placeholder is dropped from each argument, and arguments
    /// that become empty are removed.
    #[must_use]
    pub fn expand(&self, profile: Option<&str>) -> Vec<String> {
        self.argv
            .iter()
            .filter_map(|arg| {
                if !arg.contains(PROFILE_PLACEHOLDER) {
                    return Some(arg.clone());
                }
                let expanded = arg.replace(PROFILE_PLACEHOLDER, profile.unwrap_or_default());
                (!expanded.is_empty()).then_some(expanded)
            })
            .collect()
    }
}

/// The three commands the scheduler knows how to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSet {
    /// Batch sync of one profile.
    pub batch: CommandTemplate,
    /// Interactive sync of one profile.
    pub manual: CommandTemplate,
    /// Interactive session over the whole configuration.
    pub override_session: CommandTemplate,
}

impl CommandSet {
    /// Template for a profile-scoped command.
    #[must_use]
    pub const fn for_kind(&self, kind: CommandKind) -> &CommandTemplate {
        match kind {
            CommandKind::Batch => &self.batch,
            CommandKind::Manual => &self.manual,
        }
    }
}
