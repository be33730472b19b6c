use crate::AutosyncContext;
use crate::config::profiles::{PrfLoader, ProfileLoader};
use crate::config::validator::ConfigValidator;
use crate::network::NetworkProbe;
use anyhow::{Result, bail};

/// Execute check command - validate everything the daemon depends on
///
/// Performs these checks:
/// - Unknown or deprecated configuration keys
/// - Command programs present in `PATH`
/// - Profile directory readable, with at least one valid profile
/// - Network probe result
///
/// # Errors
///
/// Returns an error if any check found an error (warnings alone pass)
pub fn execute(ctx: &AutosyncContext) -> Result<()> {
    super::print_info(&format!("Checking {}...", ctx.config_path.display()));

    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    match ConfigValidator::new().validate_config_file(&ctx.config_path) {
        Ok(w) => warnings.extend(w),
        Err(e) => errors.push(format!("Config check failed: {e}")),
    }

    warnings.extend(ConfigValidator::check_programs(&ctx.config));

    match ctx.profile_dir() {
        Ok(dir) => match PrfLoader::new(&dir).load() {
            Ok(defs) if defs.is_empty() => {
                warnings.push(format!("No valid profiles in {}", dir.display()));
            }
            Ok(defs) => super::print_info(&format!("{} profile(s) in {}", defs.len(), dir.display())),
            Err(e) => errors.push(format!("{e:#}")),
        },
        Err(e) => errors.push(format!("Profile directory: {e}")),
    }

    if NetworkProbe::from_config(&ctx.config.network).is_available() {
        super::print_info("Network available");
    } else {
        warnings.push("Network unavailable: profiles will start offline".to_string());
    }

    println!();
    for error in &errors {
        super::print_error(error);
    }
    for warning in &warnings {
        super::print_warning(warning);
    }

    if !errors.is_empty() {
        bail!("Found {} error(s) and {} warning(s)", errors.len(), warnings.len());
    }
    if warnings.is_empty() {
        super::print_success("Everything looks good");
    } else {
        super::print_info(&format!("Found {} warning(s)", warnings.len()));
    }
    Ok(())
}
