//! Cross-invocation mutual exclusion for upgrades.
//!
//! Two `cloudsqlctl upgrade` runs (or an upgrade and a still-running swap
//! supervisor) must never download into or swap the same files at once. The
//! lock is an OS advisory lock on `.upgrade.lock` in the download directory,
//! released when the [`UpgradeLock`] is dropped or the process exits.
//!
//! # Async Safety
//!
//! File operations run in `spawn_blocking` so polling for a contended lock
//! never blocks a runtime worker.

use crate::constants::UPGRADE_LOCK_NAME;
use crate::core::{Result, UpgradeError};
use crate::utils::backoff::lock_poll_backoff;
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Held upgrade lock. Released on drop.
#[derive(Debug)]
pub struct UpgradeLock {
    _file: Arc<File>,
    lock_path: PathBuf,
}

impl Drop for UpgradeLock {
    fn drop(&mut self) {
        // The file is left in place; deleting it would let a waiter lock a
        // stale inode while a newcomer locks a fresh one.
        debug!(lock = %self.lock_path.display(), "Upgrade lock released");
    }
}

impl UpgradeLock {
    /// Lock file path inside `dir`.
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(UPGRADE_LOCK_NAME)
    }

    /// Acquires the lock at `lock_path`, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// [`UpgradeError::UpgradeInProgress`] when another holder keeps the lock
    /// past the timeout; [`UpgradeError::Io`] when the file cannot be opened.
    pub async fn acquire(lock_path: &Path, timeout: Duration) -> Result<Self> {
        debug!(lock = %lock_path.display(), "Waiting for upgrade lock");

        if let Some(parent) = lock_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UpgradeError::io("create lock directory", parent, e))?;
        }

        let open_path = lock_path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new().create(true).write(true).truncate(false).open(&open_path)
        })
        .await
        .map_err(|e| UpgradeError::io("open lock file", lock_path, std::io::Error::other(e)))?
        .map_err(|e| UpgradeError::io("open lock file", lock_path, e))?;
        let file = Arc::new(file);

        let start = Instant::now();
        for delay in lock_poll_backoff() {
            let file_clone = Arc::clone(&file);
            let locked = tokio::task::spawn_blocking(move || file_clone.try_lock_exclusive())
                .await
                .map_err(|e| UpgradeError::io("lock", lock_path, std::io::Error::other(e)))?;

            if let Ok(true) = locked {
                debug!(
                    lock = %lock_path.display(),
                    wait_ms = start.elapsed().as_millis(),
                    "Upgrade lock acquired"
                );
                return Ok(Self {
                    _file: file,
                    lock_path: lock_path.to_path_buf(),
                });
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(delay.min(remaining)).await;
        }

        Err(UpgradeError::UpgradeInProgress {
            path: lock_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}
