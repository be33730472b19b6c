use super::{FsEvent, FsEventKind, SubscriptionId, WatchBackend};
use crate::error::{Error, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// [`WatchBackend`] over the platform's recommended `notify` watcher.
///
/// Each directory gets one non-recursive OS watch. Several profiles may
/// subscribe the same directory, so OS watches are reference counted and only
/// dropped when the last subscription goes away. Events are delivered to the
/// handler on `notify`'s own thread.
pub struct NotifyBackend {
    /// The OS watcher.
    watcher: RecommendedWatcher,
    /// Next subscription id to hand out.
    next_id: u64,
    /// Directory behind each live subscription.
    subscriptions: HashMap<SubscriptionId, PathBuf>,
    /// Live subscriptions per directory.
    refcounts: HashMap<PathBuf, usize>,
}

impl std::fmt::Debug for NotifyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyBackend")
            .field("subscriptions", &self.subscriptions.len())
            .field("directories", &self.refcounts.len())
            .finish()
    }
}

impl NotifyBackend {
    /// Creates the backend; `handler` receives every batch of converted events.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS watcher cannot be initialized (for example
    /// the inotify instance limit is reached).
    pub fn new<F>(handler: F) -> Result<Self>
    where
        F: Fn(Vec<FsEvent>) + Send + 'static,
    {
        let watcher = notify::recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                let events = convert_event(event);
                if !events.is_empty() {
                    handler(events);
                }
            }
            Err(e) => warn!(error = %e, "filesystem watcher error"),
        })
        .map_err(|e| Error::Watch {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            watcher,
            next_id: 0,
            subscriptions: HashMap::new(),
            refcounts: HashMap::new(),
        })
    }

    /// Number of directories with an OS watch.
    #[must_use]
    pub fn watched_directories(&self) -> usize {
        self.refcounts.len()
    }
}

impl WatchBackend for NotifyBackend {
    fn subscribe(&mut self, dir: &Path) -> Result<SubscriptionId> {
        let count = self.refcounts.get(dir).copied().unwrap_or(0);
        if count == 0 {
            self.watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|e| Error::Watch {
                    path: dir.to_path_buf(),
                    reason: e.to_string(),
                })?;
        }
        self.refcounts.insert(dir.to_path_buf(), count + 1);

        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscriptions.insert(id, dir.to_path_buf());
        Ok(id)
    }

    fn cancel(&mut self, id: SubscriptionId) {
        let Some(dir) = self.subscriptions.remove(&id) else {
            return;
        };
        let remaining = match self.refcounts.get_mut(&dir) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            self.refcounts.remove(&dir);
            // the directory may already be gone, in which case the OS dropped the watch
            if let Err(e) = self.watcher.unwatch(&dir) {
                debug!(path = %dir.display(), error = %e, "unwatch failed");
            }
        }
    }
}

/// Maps a raw `notify` event onto the three kinds the watch tree cares about.
///
/// Access events carry no change and are dropped.
#[must_use]
pub fn convert_event(event: Event) -> Vec<FsEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => FsEventKind::Created,
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            FsEventKind::Removed
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FsEventKind::Created,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            let mut events = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                events.push(FsEvent::new(FsEventKind::Removed, from));
            }
            if let Some(to) = paths.next() {
                events.push(FsEvent::new(FsEventKind::Created, to));
            }
            return events;
        }
        EventKind::Modify(_) | EventKind::Any => FsEventKind::Modified,
        EventKind::Access(_) | EventKind::Other => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .map(|path| FsEvent::new(kind, path))
        .collect()
}
