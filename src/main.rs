use anyhow::Result;
use autosync::cli::{Cli, Commands};
use autosync::{AutosyncContext, commands};
use clap::{CommandFactory, Parser};
use clap_complete::{Generator, generate};
use colored::Colorize;
use std::io;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {e:#}", "Error:".red().bold());
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Completion { shell } => {
            print_completions(shell, &mut Cli::command());
            Ok(())
        }
        Commands::Run => commands::run::execute(&AutosyncContext::new(cli.config)?),
        Commands::Profiles => commands::profiles::execute(&AutosyncContext::new(cli.config)?),
        Commands::Check => commands::check::execute(&AutosyncContext::new(cli.config)?),
    }
}

/// `RUST_LOG` wins; otherwise the level follows `--verbose`/`--quiet`.
fn init_logging(verbose: bool, quiet: bool) {
    let default = if verbose {
        "autosync=debug"
    } else if quiet {
        "autosync=warn"
    } else {
        "autosync=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn print_completions<G: Generator>(g: G, cmd: &mut clap::Command) {
    generate(g, cmd, cmd.get_name().to_string(), &mut io::stdout());
}
