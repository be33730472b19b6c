//! Where state changes go: a tray icon, a terminal, a test recorder.

use crate::state::State;
use colored::{ColoredString, Colorize};
use crossterm::tty::IsTty;
use std::io;
use tracing::{info, warn};

/// Receives status updates from the scheduler.
///
/// The scheduler only calls in when a value actually changed.
pub trait PresentationSink {
    /// Aggregate status changed.
    fn status_changed(&mut self, status: State);

    /// A profile appeared, changed state or was relabelled.
    fn profile_changed(&mut self, name: &str, label: &str, state: State);

    /// A profile left the live set.
    fn profile_removed(&mut self, name: &str);

    /// Something worth a desktop-style notification.
    fn notify(&mut self, summary: &str, body: &str);
}

/// Logs every update and, on a terminal, prints a colored status line.
#[derive(Debug, Clone)]
pub struct ConsoleSink {
    /// Whether stderr is a terminal.
    interactive: bool,
}

impl ConsoleSink {
    /// Creates a sink that prints only when stderr is a terminal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            interactive: io::stderr().is_tty(),
        }
    }

    /// Creates a sink that only logs.
    #[must_use]
    pub const fn quiet() -> Self {
        Self { interactive: false }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Paints a state name the way the console shows it.
#[must_use]
pub fn paint(state: State) -> ColoredString {
    let name = state.as_str();
    match state {
        State::Unknown => name.dimmed(),
        State::Idle => name.green(),
        State::Changed | State::Due => name.yellow(),
        State::Syncing | State::Manual => name.cyan().bold(),
        State::Offline | State::Paused => name.blue(),
        State::Error => name.red().bold(),
    }
}

impl PresentationSink for ConsoleSink {
    fn status_changed(&mut self, status: State) {
        info!(%status, "status changed");
        if self.interactive {
            eprintln!("{} {}", "status".bold(), paint(status));
        }
    }

    fn profile_changed(&mut self, name: &str, label: &str, state: State) {
        info!(profile = %name, %label, %state, "profile updated");
        if self.interactive {
            eprintln!("  {label} {}", paint(state));
        }
    }

    fn profile_removed(&mut self, name: &str) {
        info!(profile = %name, "profile removed");
        if self.interactive {
            eprintln!("  {} {}", name.dimmed(), "removed".dimmed());
        }
    }

    fn notify(&mut self, summary: &str, body: &str) {
        warn!(%summary, %body, "notification");
        if self.interactive {
            eprintln!("{} {}", summary.yellow().bold(), body);
        }
    }
}
