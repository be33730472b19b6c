#![allow(dead_code)]

use autosync::command::CommandSet;
use autosync::config::Config;
use autosync::config::profiles::ProfileLoader;
use autosync::error::{Error, Result};
use autosync::presentation::PresentationSink;
use autosync::profile::ProfileDef;
use autosync::scheduler::{Collaborators, Job, Launcher, Scheduler, SchedulerSettings};
use autosync::state::State;
use autosync::watch::{SubscriptionId, WatchBackend};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Settle interval used by the scheduler fixtures
pub const SETTLE: Duration = Duration::from_secs(5);

/// Remote check interval used by the scheduler fixtures
pub const REMOTE_CHECK: Duration = Duration::from_secs(600);

/// Upper bound of a jittered settle interval
pub const MAX_JITTER: Duration = Duration::from_secs(20);

/// Watch backend that records live subscriptions
#[derive(Debug, Default)]
pub struct BackendLog {
    next: u64,
    pub live: HashMap<SubscriptionId, PathBuf>,
}

impl BackendLog {
    pub fn live_paths(&self) -> BTreeSet<PathBuf> {
        self.live.values().cloned().collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeBackend(pub Rc<RefCell<BackendLog>>);

impl WatchBackend for FakeBackend {
    fn subscribe(&mut self, dir: &Path) -> Result<SubscriptionId> {
        let mut log = self.0.borrow_mut();
        log.next += 1;
        let id = SubscriptionId(log.next);
        log.live.insert(id, dir.to_path_buf());
        Ok(id)
    }

    fn cancel(&mut self, id: SubscriptionId) {
        self.0.borrow_mut().live.remove(&id);
    }
}

/// Launcher that records jobs instead of running them
#[derive(Debug, Default)]
pub struct LaunchLog {
    pub launched: Vec<(Job, Vec<String>)>,
    /// Programs whose launch fails
    pub failing: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeLauncher(pub Rc<RefCell<LaunchLog>>);

impl Launcher for FakeLauncher {
    fn launch(&mut self, job: Job, argv: &[String]) -> Result<()> {
        let mut log = self.0.borrow_mut();
        if let Some(program) = argv.first()
            && log.failing.contains(program)
        {
            return Err(Error::Launch {
                program: program.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            });
        }
        log.launched.push((job, argv.to_vec()));
        Ok(())
    }
}

/// Loader serving whatever definitions the test puts in it
#[derive(Debug, Clone)]
pub struct StaticLoader(pub Rc<RefCell<anyhow::Result<Vec<ProfileDef>>>>);

impl StaticLoader {
    pub fn set(&self, defs: Vec<ProfileDef>) {
        *self.0.borrow_mut() = Ok(defs);
    }

    pub fn fail(&self, message: &str) {
        *self.0.borrow_mut() = Err(anyhow::anyhow!(message.to_string()));
    }
}

impl ProfileLoader for StaticLoader {
    fn load(&self) -> anyhow::Result<Vec<ProfileDef>> {
        match &*self.0.borrow() {
            Ok(defs) => Ok(defs.clone()),
            Err(e) => Err(anyhow::anyhow!(e.to_string())),
        }
    }
}

/// Everything the scheduler told its sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Status(State),
    Profile(String, String, State),
    Removed(String),
    Notify(String),
}

#[derive(Debug, Clone, Default)]
pub struct RecordingSink(pub Rc<RefCell<Vec<SinkEvent>>>);

impl PresentationSink for RecordingSink {
    fn status_changed(&mut self, status: State) {
        self.0.borrow_mut().push(SinkEvent::Status(status));
    }

    fn profile_changed(&mut self, name: &str, label: &str, state: State) {
        self.0
            .borrow_mut()
            .push(SinkEvent::Profile(name.to_string(), label.to_string(), state));
    }

    fn profile_removed(&mut self, name: &str) {
        self.0.borrow_mut().push(SinkEvent::Removed(name.to_string()));
    }

    fn notify(&mut self, summary: &str, _body: &str) {
        self.0.borrow_mut().push(SinkEvent::Notify(summary.to_string()));
    }
}

/// Scheduler wired to fakes, with handles to inspect them
pub struct Harness {
    pub scheduler: Scheduler,
    pub backend: FakeBackend,
    pub launcher: FakeLauncher,
    pub loader: StaticLoader,
    pub sink: RecordingSink,
    pub start: Instant,
}

impl Harness {
    /// Scheduler over `defs`, network up, not yet started
    pub fn new(defs: Vec<ProfileDef>) -> Self {
        Self::with_network(defs, true)
    }

    pub fn with_network(defs: Vec<ProfileDef>, network_up: bool) -> Self {
        let backend = FakeBackend::default();
        let launcher = FakeLauncher::default();
        let loader = StaticLoader(Rc::new(RefCell::new(Ok(defs))));
        let sink = RecordingSink::default();

        let collaborators = Collaborators {
            backend: Box::new(backend.clone()),
            launcher: Box::new(launcher.clone()),
            loader: Box::new(loader.clone()),
            sink: Box::new(sink.clone()),
        };
        let scheduler = Scheduler::new(settings(), collaborators, network_up).with_seed(7);

        Self {
            scheduler,
            backend,
            launcher,
            loader,
            sink,
            start: Instant::now(),
        }
    }

    /// Started scheduler whose initial sync of every profile has completed,
    /// leaving all of them idle and watched
    pub fn settled(defs: Vec<ProfileDef>) -> Self {
        let mut harness = Self::new(defs);
        harness.scheduler.start(harness.start);
        harness.drain(harness.start + MAX_JITTER);
        harness.launcher.0.borrow_mut().launched.clear();
        harness.sink.0.borrow_mut().clear();
        harness
    }

    /// Fires timers at `now` and completes every launched job successfully
    /// until nothing is left running
    pub fn drain(&mut self, now: Instant) {
        self.scheduler.tick(now);
        loop {
            let pending: Vec<Job> = self
                .launcher
                .0
                .borrow_mut()
                .launched
                .drain(..)
                .map(|(job, _)| job)
                .collect();
            if pending.is_empty() {
                break;
            }
            for job in pending {
                self.scheduler.handle_finished(now, job, true);
            }
        }
    }

    pub fn state(&self, name: &str) -> Option<State> {
        self.scheduler.profile(name).map(|p| p.state())
    }

    /// Names of launched profile jobs, in order
    pub fn launched_names(&self) -> Vec<String> {
        self.launcher
            .0
            .borrow()
            .launched
            .iter()
            .filter_map(|(job, _)| match job {
                Job::Profile { name, .. } => Some(name.clone()),
                Job::Override => None,
            })
            .collect()
    }

    pub fn take_launched(&self) -> Vec<(Job, Vec<String>)> {
        self.launcher.0.borrow_mut().launched.drain(..).collect()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.sink
            .0
            .borrow()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Notify(summary) => Some(summary.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn watched(&self) -> BTreeSet<PathBuf> {
        self.backend.0.borrow().live_paths()
    }
}

pub fn settings() -> SchedulerSettings {
    SchedulerSettings {
        settle_interval: SETTLE,
        remote_check_interval: REMOTE_CHECK,
        commands: test_commands(),
    }
}

pub fn test_commands() -> CommandSet {
    let mut config = Config::default();
    config.commands.batch = "unison {profile} -batch".to_string();
    config.commands.manual = "unison-gtk {profile}".to_string();
    config.commands.override_session = "unison-gtk".to_string();
    config.command_set().expect("test commands parse")
}

pub fn def(name: &str, roots: &[&str]) -> ProfileDef {
    ProfileDef::new(name, roots.iter().copied())
}

pub fn job(name: &str) -> Job {
    Job::Profile {
        name: name.to_string(),
        kind: autosync::command::CommandKind::Batch,
    }
}

pub fn manual_job(name: &str) -> Job {
    Job::Profile {
        name: name.to_string(),
        kind: autosync::command::CommandKind::Manual,
    }
}
