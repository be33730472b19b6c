use super::Config;
use crate::command::CommandTemplate;
use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

/// Flags config keys the daemon does not understand and commands it cannot find
pub struct ConfigValidator {
    /// Set of valid configuration fields that are recognized by autosync
    known_fields: HashSet<String>,
    /// Set of deprecated configuration fields that should trigger warnings
    deprecated_fields: HashSet<String>,
}

impl ConfigValidator {
    /// Create a new validator with known configuration fields
    #[must_use]
    pub fn new() -> Self {
        let known_fields = [
            "core.profile_dir",
            "core.settle_interval",
            "core.remote_check_interval",
            "commands.batch",
            "commands.manual",
            "commands.override",
            "network.probe_interval",
            "network.check_host",
            "network.connect_timeout",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        // Polling was replaced by per-directory watches
        let deprecated_fields = ["core.poll_interval"].into_iter().map(String::from).collect();

        Self {
            known_fields,
            deprecated_fields,
        }
    }

    /// Validate a config file on disk, logging and returning its warnings
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub fn validate_config_file(&self, config_path: &Path) -> Result<Vec<String>> {
        if !config_path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(config_path)?;
        let parsed: toml::Value = toml::from_str(&content)?;

        let mut unknown_fields = Vec::new();
        let mut deprecated_used = Vec::new();
        self.check_table(&parsed, "", &mut unknown_fields, &mut deprecated_used);

        let mut warnings: Vec<String> = unknown_fields
            .iter()
            .map(|field| format!("Unknown configuration field: {field}"))
            .collect();
        warnings.extend(deprecated_used.iter().map(|field| {
            format!("Deprecated field '{field}': this field has no effect and will be removed")
        }));

        for warning in &warnings {
            warn!(file = %config_path.display(), "{warning}");
        }
        Ok(warnings)
    }

    /// Recursively collects unknown and deprecated dotted keys under `prefix`
    fn check_table(
        &self,
        table: &toml::Value,
        prefix: &str,
        unknown: &mut Vec<String>,
        deprecated: &mut Vec<String>,
    ) {
        let toml::Value::Table(map) = table else {
            return;
        };
        for (key, value) in map {
            let full_key = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };

            if self.deprecated_fields.contains(&full_key) {
                deprecated.push(full_key);
            } else if let toml::Value::Table(_) = value {
                self.check_table(value, &full_key, unknown, deprecated);
            } else if !self.known_fields.contains(&full_key) {
                unknown.push(full_key);
            }
        }
    }

    /// Warn about command programs that are not on `PATH`
    ///
    /// A missing program is not fatal: the affected profiles go to the error
    /// state when a sync is attempted.
    #[must_use]
    pub fn check_programs(config: &Config) -> Vec<String> {
        let commands = [
            ("commands.batch", &config.commands.batch),
            ("commands.manual", &config.commands.manual),
            ("commands.override", &config.commands.override_session),
        ];

        let mut warnings = Vec::new();
        for (key, source) in commands {
            let Ok(template) = CommandTemplate::parse(source) else {
                continue;
            };
            if which::which(template.program()).is_err() {
                let warning = format!("{key}: program '{}' not found in PATH", template.program());
                warn!("{warning}");
                warnings.push(warning);
            }
        }
        warnings
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}
