use super::Config;
use anyhow::{Context, Result, bail};
use std::path::Path;

/// Reads and validates a TOML config file
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid TOML, or holds
/// values the daemon cannot run with
pub fn parse_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config_str(&content)
}

/// Parses and validates config text
///
/// # Errors
///
/// Returns an error if the text is not valid TOML or fails validation
pub fn parse_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse TOML config")?;

    // Validate and return validation errors directly without wrapping
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    if config.core.settle_interval.is_zero() {
        bail!("core.settle_interval must be greater than zero");
    }

    if config.core.remote_check_interval.is_zero() {
        bail!("core.remote_check_interval must be greater than zero");
    }

    if config.network.probe_interval.is_zero() {
        bail!("network.probe_interval must be greater than zero");
    }

    if let Some(host) = &config.network.check_host
        && !host.contains(':')
    {
        bail!("network.check_host must be host:port, got '{host}'");
    }

    config.command_set()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = parse_config_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = parse_config_str(
            r#"
[core]
settle_interval = "750ms"

[commands]
batch = "unison {profile} -batch -silent"

[network]
check_host = "example.org:443"
"#,
        )
        .unwrap();
        assert_eq!(config.core.settle_interval, Duration::from_millis(750));
        assert_eq!(config.core.remote_check_interval, Duration::from_secs(600));
        assert_eq!(config.commands.batch, "unison {profile} -batch -silent");
        assert_eq!(config.commands.manual, "unison-gtk {profile}");
        assert_eq!(config.network.check_host.as_deref(), Some("example.org:443"));
    }

    #[test]
    fn test_zero_settle_interval_rejected() {
        let err = parse_config_str("[core]\nsettle_interval = \"0s\"\n").unwrap_err();
        assert!(err.to_string().contains("settle_interval"));
    }

    #[test]
    fn test_bad_duration_rejected() {
        assert!(parse_config_str("[core]\nsettle_interval = \"soon\"\n").is_err());
    }

    #[test]
    fn test_check_host_needs_port() {
        assert!(parse_config_str("[network]\ncheck_host = \"example.org\"\n").is_err());
    }

    #[test]
    fn test_override_key_is_renamed() {
        let config = parse_config_str("[commands]\noverride = \"unison-gui\"\n").unwrap();
        assert_eq!(config.commands.override_session, "unison-gui");
    }
}
