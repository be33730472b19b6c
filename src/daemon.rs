//! The daemon process.
//!
//! Every source of work (filesystem watcher, process waiters, network
//! monitor, stdin) runs on its own thread and only sends an [`Event`] down
//! one channel. A single controller thread owns the [`Scheduler`], applies
//! events in arrival order and sleeps until the next event or timer.

use crate::AutosyncContext;
use crate::config::profiles::PrfLoader;
use crate::config::validator::ConfigValidator;
use crate::error;
use crate::lock::InstanceLock;
use crate::network::{NetworkMonitor, NetworkProbe};
use crate::presentation::{ConsoleSink, paint};
use crate::runner::ProcessRunner;
use crate::scheduler::{Collaborators, Job, Launcher, Scheduler};
use crate::watch::FsEvent;
use crate::watch::notify_backend::NotifyBackend;
use anyhow::{Result, bail};
use std::fmt::Write as _;
use std::io::{self, BufRead};
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Work for the controller thread.
#[derive(Debug)]
pub enum Event {
    /// Filesystem changes, already translated from the backend's format.
    Fs(Vec<FsEvent>),
    /// A launched command exited.
    Finished {
        /// The job that was launched.
        job: Job,
        /// Exit status was zero.
        success: bool,
    },
    /// Network availability changed.
    Network(bool),
    /// A user command.
    Control(Control),
}

/// User commands, read one per line from stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// `sync <profile>`: interactive sync of one profile.
    Sync(String),
    /// `edit`: the configuration-wide override session.
    Override,
    /// `pause`
    Pause,
    /// `resume`
    Resume,
    /// `reload`: re-read the profile directory.
    Reload,
    /// `status`: print every profile's state.
    Status,
    /// `quit`
    Quit,
}

impl FromStr for Control {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        let control = match word {
            "sync" | "manual" => {
                if rest.is_empty() {
                    bail!("usage: sync <profile>");
                }
                Self::Sync(rest.to_string())
            }
            "edit" | "override" => Self::Override,
            "pause" => Self::Pause,
            "resume" | "unpause" => Self::Resume,
            "reload" => Self::Reload,
            "status" => Self::Status,
            "quit" | "exit" => Self::Quit,
            other => bail!("unknown command '{other}' (try: sync, edit, pause, resume, reload, status, quit)"),
        };
        if !rest.is_empty() && !matches!(control, Self::Sync(_)) {
            bail!("'{word}' takes no arguments");
        }
        Ok(control)
    }
}

/// Launches through [`ProcessRunner`] and reports exits as [`Event::Finished`].
#[derive(Debug)]
pub struct ChannelLauncher {
    runner: ProcessRunner,
    events: Sender<Event>,
}

impl ChannelLauncher {
    /// Creates a launcher reporting to `events`.
    #[must_use]
    pub const fn new(events: Sender<Event>) -> Self {
        Self {
            runner: ProcessRunner::new(),
            events,
        }
    }
}

impl Launcher for ChannelLauncher {
    fn launch(&mut self, job: Job, argv: &[String]) -> error::Result<()> {
        let events = self.events.clone();
        let finished = job.clone();
        let pid = self.runner.spawn(argv, move |success| {
            // the controller may already be gone during shutdown
            let _ = events.send(Event::Finished {
                job: finished,
                success,
            });
        })?;
        debug!(pid, ?job, "job launched");
        Ok(())
    }
}

/// Whether the controller keeps running after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep going.
    Continue,
    /// Stop the loop.
    Quit,
}

/// Applies one event to the scheduler.
pub fn dispatch(scheduler: &mut Scheduler, event: Event, now: Instant) -> Flow {
    match event {
        Event::Fs(events) => scheduler.handle_fs_events(now, &events),
        Event::Finished { job, success } => scheduler.handle_finished(now, job, success),
        Event::Network(available) => scheduler.set_network(now, available),
        Event::Control(control) => {
            info!(?control, "user command");
            match control {
                Control::Sync(name) => {
                    scheduler.run_manual(&name, now);
                }
                Control::Override => {
                    scheduler.run_override(now);
                }
                Control::Pause => scheduler.pause_all(),
                Control::Resume => scheduler.unpause_all(now),
                Control::Reload => scheduler.reload(now),
                Control::Status => print!("{}", status_report(scheduler)),
                Control::Quit => return Flow::Quit,
            }
        }
    }
    Flow::Continue
}

/// Runs the controller until `Quit` or until every sender is gone.
pub fn event_loop(scheduler: &mut Scheduler, events: &Receiver<Event>) {
    loop {
        let event = match scheduler.next_deadline() {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                match events.recv_timeout(timeout) {
                    Ok(event) => Some(event),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match events.recv() {
                Ok(event) => Some(event),
                Err(_) => break,
            },
        };

        let now = Instant::now();
        if let Some(event) = event
            && dispatch(scheduler, event, now) == Flow::Quit
        {
            break;
        }
        scheduler.tick(now);
    }
}

/// Human-readable summary of the scheduler's state.
#[must_use]
pub fn status_report(scheduler: &Scheduler) -> String {
    let mut report = format!("status: {}", paint(scheduler.status()));
    if scheduler.is_paused() {
        report.push_str(" (paused)");
    }
    if !scheduler.network_available() {
        report.push_str(" (offline)");
    }
    report.push('\n');

    for profile in scheduler.profiles() {
        let _ = writeln!(report, "  {:<24} {}", profile.label(), paint(profile.state()));
    }
    report
}

fn spawn_stdin_reader(events: Sender<Event>) -> io::Result<()> {
    thread::Builder::new()
        .name("autosync-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Control>() {
                    Ok(control) => {
                        if events.send(Event::Control(control)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("{e}"),
                }
            }
            // Closed stdin (e.g. started from a service manager) is not a quit
            debug!("stdin closed");
        })?;
    Ok(())
}

/// Runs the daemon in the foreground until `quit`.
///
/// Commands still running at exit keep running in their own process groups.
///
/// # Errors
///
/// Returns an error if another instance holds the lock, the command
/// templates are invalid, or the watcher or worker threads cannot start.
pub fn run(ctx: &AutosyncContext) -> Result<()> {
    let _lock = InstanceLock::acquire(&ctx.lock_path())?;
    let _ = ConfigValidator::check_programs(&ctx.config);

    let settings = ctx.config.scheduler_settings()?;
    let profile_dir = ctx.profile_dir()?;
    info!(profile_dir = %profile_dir.display(), config = %ctx.config_path.display(), "starting");

    let (tx, rx) = mpsc::channel();

    let fs_events = tx.clone();
    let backend = NotifyBackend::new(move |events| {
        let _ = fs_events.send(Event::Fs(events));
    })?;

    let probe = NetworkProbe::from_config(&ctx.config.network);
    let network_up = probe.is_available();
    let network_events = tx.clone();
    let monitor = NetworkMonitor::start(probe, ctx.config.network.probe_interval, network_up, move |up| {
        let _ = network_events.send(Event::Network(up));
    })?;

    spawn_stdin_reader(tx.clone())?;

    let collaborators = Collaborators {
        backend: Box::new(backend),
        launcher: Box::new(ChannelLauncher::new(tx)),
        loader: Box::new(PrfLoader::new(profile_dir)),
        sink: Box::new(ConsoleSink::new()),
    };
    let mut scheduler = Scheduler::new(settings, collaborators, network_up);

    scheduler.start(Instant::now());
    event_loop(&mut scheduler, &rx);
    scheduler.shutdown();
    monitor.stop();

    info!("stopped");
    Ok(())
}
