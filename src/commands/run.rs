use crate::AutosyncContext;
use crate::daemon;
use anyhow::Result;

/// Execute run command - start the daemon in the foreground
///
/// # Errors
///
/// Returns an error if another instance is running or the daemon cannot start
pub fn execute(ctx: &AutosyncContext) -> Result<()> {
    super::print_info(&format!(
        "Watching profiles in {} (type 'status' or 'quit')",
        ctx.profile_dir()?.display()
    ));
    daemon::run(ctx)
}
