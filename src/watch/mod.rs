//! Recursive directory watching built from per-directory subscriptions.
//!
//! [`WatchTree`] keeps one node per subscribed directory, keyed by its
//! normalized path. Nodes know their parent and children so a whole subtree
//! can be cancelled when a directory disappears or a root is unwatched.
//! The OS facility is hidden behind [`WatchBackend`]; the production backend
//! lives in [`notify_backend`].

/// `notify`-based [`WatchBackend`].
pub mod notify_backend;

pub use notify_backend::NotifyBackend;

use crate::error::Result;
use crate::utils::paths::normalize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Opaque handle for one directory subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Per-directory change notification facility.
pub trait WatchBackend {
    /// Subscribe to changes of the direct entries of `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses the subscription (permissions, the
    /// directory vanished, watch limit reached).
    fn subscribe(&mut self, dir: &Path) -> Result<SubscriptionId>;

    /// Cancel a subscription. Unknown ids are ignored.
    fn cancel(&mut self, id: SubscriptionId);
}

/// What happened to a path inside a watched directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    /// Entry appeared (created or renamed into place).
    Created,
    /// Entry disappeared (deleted or renamed away).
    Removed,
    /// Contents or metadata changed.
    Modified,
}

/// A single filesystem notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    /// Kind of change.
    pub kind: FsEventKind,
    /// Absolute path of the affected entry.
    pub path: PathBuf,
}

impl FsEvent {
    /// Convenience constructor.
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

#[derive(Debug)]
struct WatchNode {
    parent: Option<PathBuf>,
    children: BTreeSet<PathBuf>,
    subscription: SubscriptionId,
}

/// Recursive watch over one or more root directories.
#[derive(Debug, Default)]
pub struct WatchTree {
    nodes: HashMap<PathBuf, WatchNode>,
    roots: BTreeSet<PathBuf>,
}

impl WatchTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Watches `root` and every directory below it.
    ///
    /// Re-watching a tracked path tears the old subscription down first.
    /// Subdirectories that cannot be subscribed are skipped together with
    /// everything below them. Returns whether the root itself was subscribed.
    pub fn watch(&mut self, root: &Path, backend: &mut dyn WatchBackend) -> bool {
        let root = normalize(root);
        if self.nodes.contains_key(&root) {
            debug!(root = %root.display(), "re-watching tracked path");
            self.unwatch(&root, backend);
        }

        if !self.attach(&root, None, backend) {
            warn!(root = %root.display(), "could not watch root directory");
            return false;
        }
        self.roots.insert(root);
        true
    }

    /// Cancels the subscription for `path` and everything below it.
    ///
    /// Unwatching a path that is not tracked is a no-op.
    pub fn unwatch(&mut self, path: &Path, backend: &mut dyn WatchBackend) {
        let path = normalize(path);
        let Some(node) = self.nodes.get(&path) else {
            return;
        };
        if let Some(parent) = node.parent.clone()
            && let Some(parent_node) = self.nodes.get_mut(&parent)
        {
            parent_node.children.remove(&path);
        }
        self.roots.remove(&path);
        self.remove_subtree(&path, backend);
    }

    /// Cancels every subscription in the tree.
    pub fn unwatch_all(&mut self, backend: &mut dyn WatchBackend) {
        let roots: Vec<PathBuf> = self.roots.iter().cloned().collect();
        for root in roots {
            self.unwatch(&root, backend);
        }
    }

    /// Applies a filesystem event to the tree.
    ///
    /// Returns the watched root the event belongs to, or `None` when the
    /// event is not for a directory this tree still watches (for example
    /// because the tree was torn down after the event was queued).
    pub fn handle_event(&mut self, event: &FsEvent, backend: &mut dyn WatchBackend) -> Option<PathBuf> {
        let dir = self.owning_dir(&event.path)?;
        let root = self.root_of(&dir)?;
        trace!(path = %event.path.display(), kind = ?event.kind, root = %root.display(), "watch event");

        match event.kind {
            FsEventKind::Created if !self.nodes.contains_key(&event.path) && event.path.is_dir() => {
                if self.nodes.contains_key(&dir) && event.path.parent() == Some(dir.as_path()) {
                    self.attach(&event.path, Some(dir), backend);
                }
            }
            FsEventKind::Removed if self.nodes.contains_key(&event.path) => {
                debug!(path = %event.path.display(), "watched directory removed");
                self.unwatch(&event.path, backend);
            }
            _ => {}
        }
        Some(root)
    }

    /// Number of subscribed directories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn attach(&mut self, dir: &Path, parent: Option<PathBuf>, backend: &mut dyn WatchBackend) -> bool {
        if !self.subscribe_node(dir.to_path_buf(), parent, backend) {
            return false;
        }

        let mut entries = WalkDir::new(dir).min_depth(1).follow_links(false).into_iter();
        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(error = %e, "skipping unreadable directory");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let path = normalize(entry.path());
            let parent = path.parent().map(Path::to_path_buf);
            if !self.subscribe_node(path, parent, backend) {
                entries.skip_current_dir();
            }
        }
        true
    }

    fn subscribe_node(&mut self, path: PathBuf, parent: Option<PathBuf>, backend: &mut dyn WatchBackend) -> bool {
        if self.nodes.contains_key(&path) {
            return true;
        }
        match backend.subscribe(&path) {
            Ok(subscription) => {
                if let Some(parent) = &parent
                    && let Some(parent_node) = self.nodes.get_mut(parent)
                {
                    parent_node.children.insert(path.clone());
                }
                self.nodes.insert(
                    path,
                    WatchNode {
                        parent,
                        children: BTreeSet::new(),
                        subscription,
                    },
                );
                true
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping unwatchable directory");
                false
            }
        }
    }

    fn remove_subtree(&mut self, path: &Path, backend: &mut dyn WatchBackend) {
        let mut pending = vec![path.to_path_buf()];
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                backend.cancel(node.subscription);
                pending.extend(node.children);
            }
        }
    }

    /// Watched directory an event path reports for: the path itself when it
    /// is a watched directory, otherwise its parent.
    fn owning_dir(&self, path: &Path) -> Option<PathBuf> {
        if self.nodes.contains_key(path) {
            return Some(path.to_path_buf());
        }
        path.parent()
            .filter(|parent| self.nodes.contains_key(*parent))
            .map(Path::to_path_buf)
    }

    fn root_of(&self, dir: &Path) -> Option<PathBuf> {
        let mut current = dir.to_path_buf();
        loop {
            let node = self.nodes.get(&current)?;
            match &node.parent {
                Some(parent) if self.nodes.contains_key(parent) => current = parent.clone(),
                _ => return Some(current),
            }
        }
    }
}
