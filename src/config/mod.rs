pub mod parser;
pub mod profiles;
pub mod validator;

use crate::command::{CommandSet, CommandTemplate};
use crate::scheduler::SchedulerSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon settings, stored as TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,

    /// External synchronizer invocations
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Network availability probing
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Directory holding the `*.prf` profile files
    #[serde(default = "default_profile_dir")]
    pub profile_dir: PathBuf,
    /// Quiet time after the last local change before a sync starts
    #[serde(default = "default_settle_interval", with = "duration_format")]
    pub settle_interval: Duration,
    /// How often idle profiles are synced to pick up remote changes
    #[serde(default = "default_remote_check_interval", with = "duration_format")]
    pub remote_check_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_batch_command")]
    pub batch: String,
    #[serde(default = "default_manual_command")]
    pub manual: String,
    /// Interactive session over every profile; runs with everything paused
    #[serde(default = "default_override_command", rename = "override")]
    pub override_session: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_probe_interval", with = "duration_format")]
    pub probe_interval: Duration,
    /// `host:port` that must accept a TCP connection for the network to count as up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_host: Option<String>,
    #[serde(default = "default_connect_timeout", with = "duration_format")]
    pub connect_timeout: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            profile_dir: default_profile_dir(),
            settle_interval: default_settle_interval(),
            remote_check_interval: default_remote_check_interval(),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            batch: default_batch_command(),
            manual: default_manual_command(),
            override_session: default_override_command(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_interval: default_probe_interval(),
            check_host: None,
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Cannot create parent directories
    /// - Cannot read or parse the configuration file
    /// - Configuration file contains invalid TOML or invalid values
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            // Create default config if it doesn't exist
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        parser::parse_config_file(path)
    }

    /// Save configuration to a file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Cannot create parent directories
    /// - Cannot write to the file
    /// - TOML serialization fails
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        let mut file = std::fs::File::create(path)?;
        file.write_all(toml_str.as_bytes())?;
        Ok(())
    }

    /// Parsed command templates
    ///
    /// # Errors
    ///
    /// Returns an error if any command string has invalid shell syntax or is empty
    pub fn command_set(&self) -> Result<CommandSet> {
        let parse = |name: &str, source: &str| {
            CommandTemplate::parse(source).with_context(|| format!("Invalid commands.{name}"))
        };
        Ok(CommandSet {
            batch: parse("batch", &self.commands.batch)?,
            manual: parse("manual", &self.commands.manual)?,
            override_session: parse("override", &self.commands.override_session)?,
        })
    }

    /// Settings handed to the scheduler
    ///
    /// # Errors
    ///
    /// Returns an error if the command templates are invalid
    pub fn scheduler_settings(&self) -> Result<SchedulerSettings> {
        Ok(SchedulerSettings {
            settle_interval: self.core.settle_interval,
            remote_check_interval: self.core.remote_check_interval,
            commands: self.command_set()?,
        })
    }

    /// Profile directory with `~` expanded
    ///
    /// # Errors
    ///
    /// Returns an error if the home or current directory cannot be determined
    pub fn profile_dir(&self) -> Result<PathBuf> {
        crate::utils::paths::resolve_local(&self.core.profile_dir)
    }
}

/// Durations as humantime strings (`"5s"`, `"10m"`)
mod duration_format {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

// Default functions for serde
fn default_profile_dir() -> PathBuf {
    PathBuf::from("~/.unison")
}

const fn default_settle_interval() -> Duration {
    Duration::from_secs(5)
}

const fn default_remote_check_interval() -> Duration {
    Duration::from_secs(600)
}

fn default_batch_command() -> String {
    "unison {profile} -batch -ui text".to_string()
}

fn default_manual_command() -> String {
    "unison-gtk {profile}".to_string()
}

fn default_override_command() -> String {
    "unison-gtk".to_string()
}

const fn default_probe_interval() -> Duration {
    Duration::from_secs(5)
}

const fn default_connect_timeout() -> Duration {
    Duration::from_secs(2)
}
