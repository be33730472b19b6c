//! Profile states and the severity order used to aggregate them.
//!
//! The variant order is load-bearing: the derived `Ord` is the severity
//! order, so the "worst" profile is simply the maximum.

use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a single profile, ordered by increasing severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum State {
    /// Freshly loaded, nothing known yet.
    #[default]
    Unknown,
    /// Watching for changes, nothing pending.
    Idle,
    /// A local change was seen; the settle timer is running.
    Changed,
    /// Settled and waiting for (or about to start) a batch sync.
    Due,
    /// A batch sync command is running.
    Syncing,
    /// An interactive command is running.
    Manual,
    /// The network is unavailable.
    Offline,
    /// Paused by the user.
    Paused,
    /// The last command failed or could not be started.
    Error,
}

impl State {
    /// Every state, in severity order.
    pub const ALL: [Self; 9] = [
        Self::Unknown,
        Self::Idle,
        Self::Changed,
        Self::Due,
        Self::Syncing,
        Self::Manual,
        Self::Offline,
        Self::Paused,
        Self::Error,
    ];

    /// Lowercase name used in logs and on the console.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Idle => "idle",
            Self::Changed => "changed",
            Self::Due => "due",
            Self::Syncing => "syncing",
            Self::Manual => "manual",
            Self::Offline => "offline",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }

    /// True while an external command owns the profile.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Syncing | Self::Manual)
    }

    /// True when a filesystem change may (re)arm the settle timer.
    #[must_use]
    pub const fn accepts_changes(self) -> bool {
        matches!(self, Self::Unknown | Self::Idle | Self::Changed)
    }

    /// True when a reload must not drop the profile out from under its work.
    #[must_use]
    pub const fn is_mid_command(self) -> bool {
        matches!(self, Self::Changed | Self::Syncing | Self::Manual)
    }

    /// Most severe state in `states`, or `Unknown` when there are none.
    pub fn worst<I>(states: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        states.into_iter().max().unwrap_or_default()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown state: {s}"))
    }
}
