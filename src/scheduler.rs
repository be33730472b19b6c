//! The orchestrator.
//!
//! [`Scheduler`] owns every live [`Profile`] and is the only thing that
//! mutates the profile set. It is driven one event at a time by the daemon
//! loop: filesystem events, timer ticks, command completions, network
//! changes and user commands. Time is always passed in, so the whole state
//! machine can be exercised without sleeping.
//!
//! Overlapping profiles (profiles sharing a monitored path) never run
//! commands at the same time. A profile whose settle timer fires while an
//! overlapping profile is due or running parks in `Due`; each completion
//! releases at most one parked profile.

use crate::command::{CommandKind, CommandSet};
use crate::config::profiles::ProfileLoader;
use crate::error::Result;
use crate::presentation::PresentationSink;
use crate::profile::{Completion, Profile, ProfileDef};
use crate::state::State;
use crate::watch::{FsEvent, WatchBackend};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{Level, debug, error, info, span, warn};

/// Multiplier for the random part of a jittered settle interval.
const JITTER_FACTOR: f64 = 3.0;

/// Tunables and command templates.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Debounce delay after the last local change.
    pub settle_interval: Duration,
    /// Period of the remote check that re-syncs idle profiles.
    pub remote_check_interval: Duration,
    /// External commands.
    pub commands: CommandSet,
}

/// A command the scheduler asked to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// A profile-scoped sync.
    Profile {
        /// Canonical profile name.
        name: String,
        /// Batch or manual.
        kind: CommandKind,
    },
    /// The configuration-wide override session.
    Override,
}

/// Starts commands on behalf of the scheduler.
///
/// A successful launch must eventually be answered by exactly one call to
/// [`Scheduler::handle_finished`] with the same job.
pub trait Launcher {
    /// Starts `argv` for `job`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be created.
    fn launch(&mut self, job: Job, argv: &[String]) -> Result<()>;
}

/// The scheduler's external collaborators.
pub struct Collaborators {
    /// Filesystem notifications.
    pub backend: Box<dyn WatchBackend>,
    /// Process spawning.
    pub launcher: Box<dyn Launcher>,
    /// Profile definitions.
    pub loader: Box<dyn ProfileLoader>,
    /// Status output.
    pub sink: Box<dyn PresentationSink>,
}

/// What a reload does with one already-live profile.
enum Reconcile {
    Keep(ProfileDef),
    ReplaceNow(ProfileDef),
    ReplaceLater(ProfileDef),
    RemoveNow,
    RemoveLater,
}

/// Owner of the live profile set.
pub struct Scheduler {
    settings: SchedulerSettings,
    profiles: BTreeMap<String, Profile>,
    /// New definitions waiting for the old instance's command to finish.
    replacements: BTreeMap<String, ProfileDef>,
    override_state: Option<State>,
    paused: bool,
    network_up: bool,
    remote_check_deadline: Option<Instant>,
    rng: StdRng,
    backend: Box<dyn WatchBackend>,
    launcher: Box<dyn Launcher>,
    loader: Box<dyn ProfileLoader>,
    sink: Box<dyn PresentationSink>,
    /// Last label/state handed to the sink, per profile.
    published: BTreeMap<String, (String, State)>,
    published_status: Option<State>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("profiles", &self.profiles.keys().collect::<Vec<_>>())
            .field("override_state", &self.override_state)
            .field("paused", &self.paused)
            .field("network_up", &self.network_up)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler with no profiles. `network_up` is the network
    /// availability read at startup.
    #[must_use]
    pub fn new(settings: SchedulerSettings, collaborators: Collaborators, network_up: bool) -> Self {
        Self {
            settings,
            profiles: BTreeMap::new(),
            replacements: BTreeMap::new(),
            override_state: None,
            paused: false,
            network_up,
            remote_check_deadline: None,
            rng: StdRng::from_os_rng(),
            backend: collaborators.backend,
            launcher: collaborators.launcher,
            loader: collaborators.loader,
            sink: collaborators.sink,
            published: BTreeMap::new(),
            published_status: None,
        }
    }

    /// Uses a fixed seed for settle jitter.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Loads the profiles, queues them and arms the remote check.
    pub fn start(&mut self, now: Instant) {
        info!(network = self.network_up, "scheduler starting");
        self.reload(now);
        self.remote_check_deadline = Some(now + self.settings.remote_check_interval);
        self.publish();
    }

    /// Tears down every watch and stops the remote check.
    pub fn shutdown(&mut self) {
        info!("scheduler shutting down");
        for profile in self.profiles.values_mut() {
            profile.stop_monitoring(self.backend.as_mut());
        }
        self.remote_check_deadline = None;
    }

    /// Aggregate status: the override state during an override session,
    /// otherwise the most severe profile state.
    #[must_use]
    pub fn status(&self) -> State {
        self.override_state
            .unwrap_or_else(|| State::worst(self.profiles.values().map(Profile::state)))
    }

    /// A live profile by name.
    #[must_use]
    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    /// Live profiles in name order.
    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    /// True while a global pause is in effect.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Last known network availability.
    #[must_use]
    pub const fn network_available(&self) -> bool {
        self.network_up
    }

    /// True while the override command runs.
    #[must_use]
    pub const fn override_active(&self) -> bool {
        self.override_state.is_some()
    }

    /// Earliest pending timer.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.profiles
            .values()
            .filter_map(Profile::settle_deadline)
            .chain(self.remote_check_deadline)
            .min()
    }

    /// Routes filesystem events to the profiles whose trees they belong to.
    pub fn handle_fs_events(&mut self, now: Instant, events: &[FsEvent]) {
        let settle = self.settings.settle_interval;
        for event in events {
            for profile in self.profiles.values_mut() {
                if profile.handle_fs_event(event, self.backend.as_mut())
                    && profile.notice_change(now, settle)
                {
                    debug!(profile = %profile.name(), path = %event.path.display(), "local change");
                }
            }
        }
        self.publish();
    }

    /// Fires every timer that is due at `now`.
    pub fn tick(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .profiles
            .iter_mut()
            .filter_map(|(name, profile)| profile.take_expired(now).then(|| name.clone()))
            .collect();
        for name in expired {
            self.settle(&name, now);
        }

        if let Some(deadline) = self.remote_check_deadline
            && deadline <= now
        {
            self.remote_check_deadline = Some(now + self.settings.remote_check_interval);
            self.remote_check(now);
        }
        self.publish();
    }

    /// Applies the exit of a previously launched job.
    pub fn handle_finished(&mut self, now: Instant, job: Job, success: bool) {
        match job {
            Job::Override => self.finish_override(now, success),
            Job::Profile { name, .. } => self.finish_profile(now, &name, success),
        }
        self.publish();
    }

    /// Reacts to a network availability change.
    pub fn set_network(&mut self, now: Instant, available: bool) {
        if available == self.network_up {
            return;
        }
        self.network_up = available;

        if available {
            info!("network restored");
            let names = self.names_in(&[State::Unknown, State::Idle, State::Offline, State::Error]);
            for name in names {
                self.queue_profile(&name, now);
            }
            self.sink.notify("Network available", "Synchronization resumed");
        } else {
            info!("network lost");
            for profile in self.profiles.values_mut() {
                if profile.state().is_running() || profile.state() == State::Paused {
                    continue;
                }
                profile.stop_monitoring(self.backend.as_mut());
                profile.cancel_settle();
                profile.set_state(State::Offline);
            }
            self.sink.notify("Network unavailable", "Synchronization suspended");
        }
        self.publish();
    }

    /// Pauses every profile. Running profiles finish first and then pause.
    ///
    /// Refused while an override session runs; the session owns the pause.
    pub fn pause_all(&mut self) {
        if self.refuse_during_override("pause") {
            return;
        }
        self.suspend_all();
    }

    /// Lifts a global pause: paused profiles are queued again and the
    /// remote check restarts.
    ///
    /// Refused while an override session runs; its completion resumes.
    pub fn unpause_all(&mut self, now: Instant) {
        if self.refuse_during_override("resume") {
            return;
        }
        self.resume_all(now);
    }

    fn refuse_during_override(&mut self, action: &str) -> bool {
        if self.override_state.is_none() {
            return false;
        }
        warn!(action, "override session running, request refused");
        self.sink
            .notify("Override session running", &format!("Cannot {action} until it finishes"));
        true
    }

    fn suspend_all(&mut self) {
        info!("pausing all profiles");
        self.paused = true;
        self.remote_check_deadline = None;
        for profile in self.profiles.values_mut() {
            if profile.state().is_running() {
                profile.pause_on_exit = true;
            } else {
                profile.stop_monitoring(self.backend.as_mut());
                profile.cancel_settle();
                profile.set_state(State::Paused);
            }
        }
        self.publish();
    }

    fn resume_all(&mut self, now: Instant) {
        info!("resuming all profiles");
        self.paused = false;
        let mut paused = Vec::new();
        for profile in self.profiles.values_mut() {
            profile.pause_on_exit = false;
            if profile.state() == State::Paused {
                paused.push(profile.name().to_string());
            }
        }
        for name in paused {
            self.admit(&name, now);
        }
        self.remote_check_deadline = Some(now + self.settings.remote_check_interval);
        self.publish();
    }

    /// Runs the interactive command for one profile. Returns whether it started.
    pub fn run_manual(&mut self, name: &str, now: Instant) -> bool {
        let span = span!(Level::INFO, "manual", profile = %name);
        let _guard = span.enter();

        let Some(profile) = self.profiles.get(name) else {
            warn!("no such profile");
            return false;
        };
        if self.override_state.is_some() {
            warn!("override session running, manual sync refused");
            return false;
        }
        if let Err(e) = profile.check_can_spawn() {
            warn!(error = %e, "manual sync refused");
            return false;
        }
        if let Some(other) = self.busy_overlap(name) {
            let body = format!("{} overlaps {other}, which is running", profile.label());
            warn!(%other, "overlapping profile running, manual sync refused");
            self.sink.notify("Profile busy", &body);
            return false;
        }

        if let Some(profile) = self.profiles.get_mut(name) {
            profile.stop_monitoring(self.backend.as_mut());
            profile.cancel_settle();
        }
        let started = self.spawn_profile(name, CommandKind::Manual, now);
        if started
            && self.paused
            && let Some(profile) = self.profiles.get_mut(name)
        {
            profile.pause_on_exit = true;
        }
        self.publish();
        started
    }

    /// Pauses everything and runs the configuration-wide override command.
    /// Returns whether it started.
    pub fn run_override(&mut self, now: Instant) -> bool {
        if self.override_state.is_some() {
            warn!("override session already running");
            return false;
        }
        self.suspend_all();

        let argv = self.settings.commands.override_session.expand(None);
        let started = match self.launcher.launch(Job::Override, &argv) {
            Ok(()) => {
                info!(command = ?argv, "override session started");
                self.override_state = Some(State::Manual);
                true
            }
            Err(e) => {
                error!(error = %e, "could not start override command");
                self.sink.notify("Could not start", &e.to_string());
                self.resume_all(now);
                false
            }
        };
        self.publish();
        started
    }

    /// Re-reads the profile definitions and reconciles the live set.
    ///
    /// Unchanged profiles keep their state. Profiles that vanished or changed
    /// while mid-command are kept until that command finishes.
    pub fn reload(&mut self, now: Instant) {
        let span = span!(Level::INFO, "reload");
        let _guard = span.enter();

        let defs = match self.loader.load() {
            Ok(defs) => defs,
            Err(e) => {
                error!(error = %format!("{e:#}"), "could not load profiles, keeping the current set");
                self.sink.notify("Configuration error", &format!("{e:#}"));
                return;
            }
        };

        let mut incoming: BTreeMap<String, ProfileDef> = BTreeMap::new();
        for def in defs {
            if let Err(e) = def.validate() {
                warn!(error = %e, "profile excluded");
                continue;
            }
            if incoming.contains_key(&def.name) {
                warn!(profile = %def.name, "duplicate profile name, keeping the first");
                continue;
            }
            incoming.insert(def.name.clone(), def);
        }

        let existing: Vec<String> = self.profiles.keys().cloned().collect();
        let mut fresh = Vec::new();
        for name in existing {
            let Some(profile) = self.profiles.get(&name) else {
                continue;
            };
            let mid_command = profile.state().is_mid_command();
            let decision = match incoming.remove(&name) {
                Some(def) if def == *profile.def() => Reconcile::Keep(def),
                Some(def) if mid_command => Reconcile::ReplaceLater(def),
                Some(def) => Reconcile::ReplaceNow(def),
                None if mid_command => Reconcile::RemoveLater,
                None => Reconcile::RemoveNow,
            };

            match decision {
                Reconcile::Keep(def) => {
                    self.replacements.remove(&name);
                    if let Some(profile) = self.profiles.get_mut(&name) {
                        profile.set_label(&def.label);
                        profile.remove_on_exit = false;
                    }
                }
                Reconcile::ReplaceLater(def) => {
                    info!(profile = %name, "definition changed, replacing once its command finishes");
                    self.replacements.insert(name.clone(), def);
                    self.flag_remove_on_exit(&name);
                }
                Reconcile::ReplaceNow(def) => {
                    self.replacements.remove(&name);
                    self.drop_profile(&name, now);
                    self.profiles.insert(name.clone(), Profile::new(def));
                    fresh.push(name);
                }
                Reconcile::RemoveLater => {
                    info!(profile = %name, "profile removed from configuration, dropping once its command finishes");
                    self.replacements.remove(&name);
                    self.flag_remove_on_exit(&name);
                }
                Reconcile::RemoveNow => {
                    self.replacements.remove(&name);
                    self.drop_profile(&name, now);
                }
            }
        }

        for (name, def) in incoming {
            info!(profile = %name, "profile added");
            self.profiles.insert(name.clone(), Profile::new(def));
            fresh.push(name);
        }
        for name in fresh {
            self.admit(&name, now);
        }

        // a dropped profile may have been what a parked one was waiting on
        self.release_next_due(now);
        self.publish();
    }

    fn flag_remove_on_exit(&mut self, name: &str) {
        if let Some(profile) = self.profiles.get_mut(name) {
            profile.remove_on_exit = true;
        }
    }

    /// Puts a new or unpaused profile on the path that fits the global state.
    fn admit(&mut self, name: &str, now: Instant) {
        if self.paused {
            if let Some(profile) = self.profiles.get_mut(name) {
                profile.set_state(State::Paused);
            }
        } else if !self.network_up {
            if let Some(profile) = self.profiles.get_mut(name) {
                profile.set_state(State::Offline);
            }
        } else {
            self.queue_profile(name, now);
        }
    }

    /// `base + uniform[0, 1) * 3 * base`.
    fn jittered_interval(&mut self) -> Duration {
        let base = self.settings.settle_interval;
        base + base.mul_f64(self.rng.random::<f64>() * JITTER_FACTOR)
    }

    /// Arms a jittered settle timer, watching the profile if it is not yet.
    fn queue_profile(&mut self, name: &str, now: Instant) {
        let interval = self.jittered_interval();
        let Some(profile) = self.profiles.get_mut(name) else {
            return;
        };
        if !profile.is_monitoring() {
            profile.start_monitoring(self.backend.as_mut());
        }
        debug!(profile = %name, ?interval, "queued");
        profile.queue(now, interval);
    }

    fn remote_check(&mut self, now: Instant) {
        if !self.network_up {
            debug!("network down, skipping remote check");
            return;
        }
        let names = self.names_in(&[State::Unknown, State::Idle, State::Error]);
        debug!(count = names.len(), "remote check");
        for name in names {
            self.queue_profile(&name, now);
        }
    }

    fn names_in(&self, states: &[State]) -> Vec<String> {
        self.profiles
            .values()
            .filter(|profile| states.contains(&profile.state()))
            .map(|profile| profile.name().to_string())
            .collect()
    }

    /// The settle timer of `name` elapsed while it was `Changed`.
    fn settle(&mut self, name: &str, now: Instant) {
        let blocker = self.blocking_overlap(name);
        let Some(profile) = self.profiles.get_mut(name) else {
            return;
        };
        // the sync tool's own writes must not look like fresh changes
        profile.stop_monitoring(self.backend.as_mut());
        profile.set_state(State::Due);

        match blocker {
            Some(other) => info!(profile = %name, waiting_for = %other, "overlapping profile busy, deferring"),
            None => {
                self.spawn_profile(name, CommandKind::Batch, now);
            }
        }
    }

    /// Another profile sharing a path with `name` that is due or running.
    fn blocking_overlap(&self, name: &str) -> Option<String> {
        let profile = self.profiles.get(name)?;
        self.profiles
            .values()
            .find(|other| {
                other.name() != name
                    && matches!(other.state(), State::Due | State::Syncing | State::Manual)
                    && other.overlaps(profile)
            })
            .map(|other| other.name().to_string())
    }

    /// Another profile sharing a path with `name` that is running.
    fn busy_overlap(&self, name: &str) -> Option<String> {
        let profile = self.profiles.get(name)?;
        self.profiles
            .values()
            .find(|other| other.name() != name && other.state().is_running() && other.overlaps(profile))
            .map(|other| other.name().to_string())
    }

    /// Launches a profile command. Returns whether it started.
    fn spawn_profile(&mut self, name: &str, kind: CommandKind, now: Instant) -> bool {
        let Some(profile) = self.profiles.get_mut(name) else {
            return false;
        };
        if let Err(e) = profile.check_can_spawn() {
            warn!(error = %e, "spawn rejected");
            return false;
        }

        let argv = self.settings.commands.for_kind(kind).expand(Some(name));
        let job = Job::Profile {
            name: name.to_string(),
            kind,
        };
        match self.launcher.launch(job, &argv) {
            Ok(()) => {
                profile.launched(kind);
                true
            }
            Err(e) => {
                error!(profile = %name, error = %e, "could not start sync");
                profile.launch_failed();
                let remove = profile.remove_on_exit;
                let body = format!("{}: {e}", profile.label());
                self.sink.notify("Sync could not start", &body);
                if remove {
                    // no completion will ever arrive to drop it
                    self.drop_profile(name, now);
                }
                false
            }
        }
    }

    fn finish_profile(&mut self, now: Instant, name: &str, success: bool) {
        let Some(profile) = self.profiles.get_mut(name) else {
            warn!(profile = %name, "completion for unknown profile");
            return;
        };
        if !profile.state().is_running() {
            warn!(profile = %name, state = %profile.state(), "completion for a profile with no running command");
            return;
        }

        match profile.finish(success) {
            Completion::Remove => self.drop_profile(name, now),
            Completion::Pause => {}
            Completion::Fail => {
                let label = profile.label().to_string();
                self.sink.notify("Sync failed", &label);
            }
            // the network went away while the command ran
            Completion::Idle if !self.network_up => {
                profile.set_state(State::Offline);
            }
            Completion::Idle => profile.start_monitoring(self.backend.as_mut()),
        }
        self.release_next_due(now);
    }

    fn finish_override(&mut self, now: Instant, success: bool) {
        if self.override_state.take().is_none() {
            warn!("override completion without a running session");
            return;
        }
        if !success {
            warn!("override command exited unsuccessfully");
        }
        self.reload(now);
        self.resume_all(now);
    }

    /// Starts the first parked profile that no running profile overlaps.
    /// Candidates whose launch fails are skipped so nothing stays parked
    /// waiting for a completion that will not come.
    fn release_next_due(&mut self, now: Instant) {
        loop {
            let candidate = self
                .profiles
                .values()
                .filter(|profile| profile.state() == State::Due)
                .find(|profile| {
                    !self
                        .profiles
                        .values()
                        .any(|other| other.state().is_running() && other.overlaps(profile))
                })
                .map(|profile| profile.name().to_string());

            let Some(name) = candidate else {
                return;
            };
            info!(profile = %name, "releasing deferred profile");
            if self.spawn_profile(&name, CommandKind::Batch, now) {
                return;
            }
        }
    }

    /// Removes a profile from the live set, installing a pending replacement.
    fn drop_profile(&mut self, name: &str, now: Instant) {
        if let Some(mut profile) = self.profiles.remove(name) {
            profile.stop_monitoring(self.backend.as_mut());
            info!(profile = %name, "profile dropped");
        }
        if let Some(def) = self.replacements.remove(name) {
            info!(profile = %name, "installing updated definition");
            self.profiles.insert(name.to_string(), Profile::new(def));
            self.admit(name, now);
        }
    }

    /// Sends every label/state/status change since the last call to the sink.
    fn publish(&mut self) {
        let removed: Vec<String> = self
            .published
            .keys()
            .filter(|name| !self.profiles.contains_key(*name))
            .cloned()
            .collect();
        for name in removed {
            self.published.remove(&name);
            self.sink.profile_removed(&name);
        }

        for profile in self.profiles.values() {
            let current = (profile.label().to_string(), profile.state());
            if self.published.get(profile.name()) != Some(&current) {
                self.sink.profile_changed(profile.name(), &current.0, current.1);
                self.published.insert(profile.name().to_string(), current);
            }
        }

        let status = self.status();
        if self.published_status != Some(status) {
            self.published_status = Some(status);
            self.sink.status_changed(status);
        }
    }
}
