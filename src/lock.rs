//! Single-instance locking
//!
//! Two daemons watching the same profiles would race each other's syncs, so
//! `autosync run` holds an exclusive lock on a file next to its config for its
//! whole lifetime. The lock is released when dropped.

use anyhow::{Context, Result, bail};
use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Holds the daemon's exclusive instance lock
#[derive(Debug)]
pub struct InstanceLock {
    /// Lock file handle
    lock_file: File,
    /// Path to the lock file (for error messages and cleanup)
    lock_path: PathBuf,
}

impl InstanceLock {
    /// Acquire the instance lock at `lock_path`, failing immediately if
    /// another process holds it
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Cannot create the lock file or its directory
    /// - Another autosync instance already holds the lock
    pub fn acquire(lock_path: &Path) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        // Not truncated on open: the holder's details stay readable until we own it
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path)
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;

        match lock_file.try_lock_exclusive() {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                let holder = fs::read_to_string(lock_path).unwrap_or_default();
                bail!(
                    "Another autosync instance is already running ({}). \
                     Stop it first or remove the stale lock at: {}",
                    holder.lines().next().unwrap_or("pid unknown"),
                    lock_path.display()
                );
            }
        }

        lock_file.set_len(0)?;
        let mut file_ref = &lock_file;
        let _ = writeln!(
            file_ref,
            "pid={}\ntime={}",
            std::process::id(),
            humantime::format_rfc3339(SystemTime::now())
        );

        Ok(Self {
            lock_file,
            lock_path: lock_path.to_path_buf(),
        })
    }

    /// Path of the held lock file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();

        if let Err(e) = fs::remove_file(&self.lock_path) {
            tracing::warn!(path = %self.lock_path.display(), error = %e, "failed to remove lock file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_writes_pid_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state/autosync.lock");

        let lock = InstanceLock::acquire(&path).unwrap();
        let content = fs::read_to_string(lock.path()).unwrap();
        assert!(content.starts_with(&format!("pid={}", std::process::id())));

        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_second_instance_fails_immediately() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("autosync.lock");
        let _lock = InstanceLock::acquire(&path).unwrap();

        let err = InstanceLock::acquire(&path).unwrap_err();
        assert!(err.to_string().contains("already running"));
    }

    #[test]
    fn test_lock_can_be_retaken_after_release() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("autosync.lock");
        drop(InstanceLock::acquire(&path).unwrap());
        assert!(InstanceLock::acquire(&path).is_ok());
    }
}
