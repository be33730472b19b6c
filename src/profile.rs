//! Profiles: one synchronization unit each.
//!
//! [`ProfileDef`] is the configuration as loaded from disk; [`Profile`] is
//! the live instance with its state machine, settle timer and watch tree.
//! A profile never talks to the scheduler directly. Methods return what
//! happened and the scheduler decides what to do next.

use crate::command::CommandKind;
use crate::error::{Error, Result};
use crate::state::State;
use crate::utils::paths::normalize;
use crate::watch::{FsEvent, WatchBackend, WatchTree};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Smallest number of local roots a profile may have.
pub const MIN_ROOTS: usize = 1;

/// Largest number of local roots a profile may have.
pub const MAX_ROOTS: usize = 2;

/// Profile configuration.
///
/// Equality ignores the label: two definitions are the same profile iff the
/// name, roots, sub-paths and mount points match.
#[derive(Debug, Clone, Eq)]
pub struct ProfileDef {
    /// Canonical name, unique within the profile set.
    pub name: String,
    /// Human-readable label.
    pub label: String,
    /// Local root directories.
    pub roots: BTreeSet<PathBuf>,
    /// Sub-paths relative to each root; empty means "the whole root".
    pub paths: BTreeSet<PathBuf>,
    /// Mount points that must be mounted for the profile to be usable.
    pub mountpoints: BTreeSet<PathBuf>,
}

impl PartialEq for ProfileDef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.roots == other.roots
            && self.paths == other.paths
            && self.mountpoints == other.mountpoints
    }
}

impl ProfileDef {
    /// Creates a definition whose label is its name.
    pub fn new<I, P>(name: impl Into<String>, roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            roots: roots.into_iter().map(Into::into).collect(),
            paths: BTreeSet::new(),
            mountpoints: BTreeSet::new(),
        }
    }

    /// Sets the sub-paths.
    #[must_use]
    pub fn with_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the mount points.
    #[must_use]
    pub fn with_mountpoints<I, P>(mut self, mountpoints: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.mountpoints = mountpoints.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Checks the root-count rule.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidProfile`] when there are fewer than one or
    /// more than two local roots.
    pub fn validate(&self) -> Result<()> {
        let count = self.roots.len();
        if !(MIN_ROOTS..=MAX_ROOTS).contains(&count) {
            return Err(Error::InvalidProfile {
                name: self.name.clone(),
                reason: format!("expected {MIN_ROOTS} or {MAX_ROOTS} local roots, found {count}"),
            });
        }
        Ok(())
    }

    /// Absolute, normalized paths to watch: every root × sub-path pair, or
    /// the roots themselves when no sub-paths are declared.
    #[must_use]
    pub fn monitored_paths(&self) -> BTreeSet<PathBuf> {
        if self.paths.is_empty() {
            return self.roots.iter().map(|root| normalize(root)).collect();
        }
        self.roots
            .iter()
            .flat_map(|root| self.paths.iter().map(move |path| normalize(&root.join(path))))
            .collect()
    }
}

/// What a finished command did to its profile, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The profile was flagged for removal and must leave the live set.
    Remove,
    /// A pause was requested while the command ran.
    Pause,
    /// The command exited unsuccessfully.
    Fail,
    /// Back to watching.
    Idle,
}

/// A live profile.
#[derive(Debug)]
pub struct Profile {
    def: ProfileDef,
    monitored: BTreeSet<PathBuf>,
    state: State,
    settle_deadline: Option<Instant>,
    watches: WatchTree,
    /// Drop the profile when its running command finishes.
    pub remove_on_exit: bool,
    /// Go to `Paused` when its running command finishes.
    pub pause_on_exit: bool,
}

impl Profile {
    /// Creates a profile in state `Unknown` with no watches.
    #[must_use]
    pub fn new(def: ProfileDef) -> Self {
        let monitored = def.monitored_paths();
        Self {
            def,
            monitored,
            state: State::Unknown,
            settle_deadline: None,
            watches: WatchTree::new(),
            remove_on_exit: false,
            pause_on_exit: false,
        }
    }

    /// Canonical name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Display label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.def.label
    }

    /// Replaces the label; the label is not part of the profile's identity.
    pub fn set_label(&mut self, label: &str) {
        label.clone_into(&mut self.def.label);
    }

    /// The configuration this profile was built from.
    #[must_use]
    pub const fn def(&self) -> &ProfileDef {
        &self.def
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> State {
        self.state
    }

    /// Cached monitored paths.
    #[must_use]
    pub const fn monitored_paths(&self) -> &BTreeSet<PathBuf> {
        &self.monitored
    }

    /// Pending settle deadline, if the timer is armed.
    #[must_use]
    pub const fn settle_deadline(&self) -> Option<Instant> {
        self.settle_deadline
    }

    /// True when at least one watch is live.
    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        !self.watches.is_empty()
    }

    /// True when both profiles watch at least one common path.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        !self.monitored.is_disjoint(&other.monitored)
    }

    /// Forces the state. Returns whether it changed.
    pub fn set_state(&mut self, state: State) -> bool {
        if self.state == state {
            return false;
        }
        debug!(profile = %self.def.name, from = %self.state, to = %state, "state change");
        self.state = state;
        true
    }

    /// A local change was seen. Arms or restarts the settle timer unless
    /// the profile is in a state that must not be revived.
    pub fn notice_change(&mut self, now: Instant, interval: Duration) -> bool {
        if !self.state.accepts_changes() {
            return false;
        }
        self.queue(now, interval);
        true
    }

    /// Unconditionally moves to `Changed` with a settle timer of `interval`.
    pub fn queue(&mut self, now: Instant, interval: Duration) {
        self.settle_deadline = Some(now + interval);
        self.set_state(State::Changed);
    }

    /// Cancels the settle timer. A pending `Changed`/`Due` falls back to `Idle`;
    /// more severe states are kept.
    pub fn cancel_settle(&mut self) {
        self.settle_deadline = None;
        if matches!(self.state, State::Changed | State::Due) {
            self.set_state(State::Idle);
        }
    }

    /// Clears an expired settle timer. Returns true if the profile should
    /// now settle (the timer elapsed while `Changed`).
    pub fn take_expired(&mut self, now: Instant) -> bool {
        match self.settle_deadline {
            Some(deadline) if deadline <= now => {
                self.settle_deadline = None;
                self.state == State::Changed
            }
            _ => false,
        }
    }

    /// Watches every monitored path. Paths already watched are re-watched.
    pub fn start_monitoring(&mut self, backend: &mut dyn WatchBackend) {
        for path in &self.monitored {
            if !self.watches.watch(path, backend) {
                warn!(profile = %self.def.name, path = %path.display(), "path is not being watched");
            }
        }
    }

    /// Tears down every watch.
    pub fn stop_monitoring(&mut self, backend: &mut dyn WatchBackend) {
        self.watches.unwatch_all(backend);
    }

    /// Feeds a filesystem event to this profile's watch tree. Returns true
    /// if the event belongs to one of its roots.
    pub fn handle_fs_event(&mut self, event: &FsEvent, backend: &mut dyn WatchBackend) -> bool {
        self.watches.handle_event(event, backend).is_some()
    }

    /// Refuses a second command while one is running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SpawnRejected`] while `Syncing` or `Manual`.
    pub fn check_can_spawn(&self) -> Result<()> {
        if self.state.is_running() {
            return Err(Error::SpawnRejected(self.def.name.clone()));
        }
        Ok(())
    }

    /// A command was launched for this profile.
    pub fn launched(&mut self, kind: CommandKind) {
        self.settle_deadline = None;
        let state = match kind {
            CommandKind::Batch => State::Syncing,
            CommandKind::Manual => State::Manual,
        };
        self.set_state(state);
    }

    /// The command could not be started.
    pub fn launch_failed(&mut self) {
        self.settle_deadline = None;
        self.set_state(State::Error);
    }

    /// Applies a command's exit. Exactly one outcome applies, checked in
    /// order: removal, pause, failure, idle.
    pub fn finish(&mut self, success: bool) -> Completion {
        self.settle_deadline = None;
        let completion = if self.remove_on_exit {
            self.set_state(State::Unknown);
            Completion::Remove
        } else if self.pause_on_exit {
            self.pause_on_exit = false;
            self.set_state(State::Paused);
            Completion::Pause
        } else if !success {
            self.set_state(State::Error);
            Completion::Fail
        } else {
            self.set_state(State::Idle);
            Completion::Idle
        };
        info!(profile = %self.def.name, success, outcome = ?completion, "command finished");
        completion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn profile(name: &str, roots: &[&str]) -> Profile {
        Profile::new(ProfileDef::new(name, roots.iter().copied()))
    }

    #[test]
    fn test_monitored_paths_without_subpaths_are_roots() {
        let def = ProfileDef::new("docs", ["/home/u/docs/", "/mnt/backup/docs"]);
        let expected: BTreeSet<PathBuf> = ["/home/u/docs", "/mnt/backup/docs"]
            .into_iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(def.monitored_paths(), expected);
    }

    #[test]
    fn test_monitored_paths_cross_roots_and_subpaths() {
        let def = ProfileDef::new("home", ["/a", "/b"]).with_paths(["x", "y/./z"]);
        let expected: BTreeSet<PathBuf> = ["/a/x", "/a/y/z", "/b/x", "/b/y/z"]
            .into_iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(def.monitored_paths(), expected);
    }

    #[rstest]
    #[case(&[], false)]
    #[case(&["/a"], true)]
    #[case(&["/a", "/b"], true)]
    #[case(&["/a", "/b", "/c"], false)]
    fn test_root_count_rule(#[case] roots: &[&str], #[case] valid: bool) {
        let def = ProfileDef::new("p", roots.iter().copied());
        assert_eq!(def.validate().is_ok(), valid);
    }

    #[test]
    fn test_equality_ignores_label() {
        let a = ProfileDef::new("p", ["/a"]).with_label("Alpha");
        let b = ProfileDef::new("p", ["/a"]).with_label("Beta");
        let c = ProfileDef::new("p", ["/a"]).with_paths(["sub"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_overlap_is_shared_monitored_path() {
        let a = profile("a", &["/data/shared", "/data/a"]);
        let b = profile("b", &["/data/shared"]);
        let c = profile("c", &["/data/c"]);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[rstest]
    #[case(State::Unknown, true)]
    #[case(State::Idle, true)]
    #[case(State::Changed, true)]
    #[case(State::Due, false)]
    #[case(State::Syncing, false)]
    #[case(State::Manual, false)]
    #[case(State::Offline, false)]
    #[case(State::Paused, false)]
    #[case(State::Error, false)]
    fn test_change_only_arms_timer_when_idle_like(#[case] from: State, #[case] arms: bool) {
        let mut p = profile("p", &["/a"]);
        p.set_state(from);
        let now = Instant::now();
        assert_eq!(p.notice_change(now, Duration::from_secs(5)), arms);
        if arms {
            assert_eq!(p.state(), State::Changed);
            assert_eq!(p.settle_deadline(), Some(now + Duration::from_secs(5)));
        } else {
            assert_eq!(p.state(), from);
            assert_eq!(p.settle_deadline(), None);
        }
    }

    #[test]
    fn test_repeated_changes_reset_rather_than_stack() {
        let mut p = profile("p", &["/a"]);
        let start = Instant::now();
        let interval = Duration::from_secs(5);
        p.notice_change(start, interval);
        p.notice_change(start + Duration::from_secs(3), interval);

        assert!(!p.take_expired(start + interval));
        assert!(p.take_expired(start + Duration::from_secs(8)));
        // the timer fires once
        assert!(!p.take_expired(start + Duration::from_secs(20)));
    }

    #[test]
    fn test_cancel_settle_never_discards_severe_state() {
        let mut p = profile("p", &["/a"]);
        p.queue(Instant::now(), Duration::from_secs(1));
        p.cancel_settle();
        assert_eq!(p.state(), State::Idle);
        assert_eq!(p.settle_deadline(), None);

        p.set_state(State::Error);
        p.cancel_settle();
        assert_eq!(p.state(), State::Error);
    }

    #[test]
    fn test_second_spawn_is_rejected() {
        let mut p = profile("p", &["/a"]);
        assert!(p.check_can_spawn().is_ok());
        p.launched(CommandKind::Batch);
        assert_eq!(p.state(), State::Syncing);
        assert!(matches!(p.check_can_spawn(), Err(Error::SpawnRejected(_))));

        p.finish(true);
        p.launched(CommandKind::Manual);
        assert_eq!(p.state(), State::Manual);
        assert!(p.check_can_spawn().is_err());
    }

    #[rstest]
    #[case(true, true, false, Completion::Remove, State::Unknown)]
    #[case(false, true, false, Completion::Pause, State::Paused)]
    #[case(false, false, false, Completion::Fail, State::Error)]
    #[case(false, false, true, Completion::Idle, State::Idle)]
    #[case(true, false, true, Completion::Remove, State::Unknown)]
    #[case(false, true, true, Completion::Pause, State::Paused)]
    fn test_completion_priority(
        #[case] remove: bool,
        #[case] pause: bool,
        #[case] success: bool,
        #[case] expected: Completion,
        #[case] state: State,
    ) {
        let mut p = profile("p", &["/a"]);
        p.launched(CommandKind::Batch);
        p.remove_on_exit = remove;
        p.pause_on_exit = pause;
        assert_eq!(p.finish(success), expected);
        assert_eq!(p.state(), state);
    }

    #[test]
    fn test_launch_failure_is_error() {
        let mut p = profile("p", &["/a"]);
        p.queue(Instant::now(), Duration::from_secs(1));
        p.launch_failed();
        assert_eq!(p.state(), State::Error);
        assert_eq!(p.settle_deadline(), None);
    }
}
