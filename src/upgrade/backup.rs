use crate::constants::BACKUP_SUFFIX;
use crate::core::{Result, UpgradeError};
use crate::utils::platform::sibling_path;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

const RESTORE_ATTEMPTS: u32 = 3;
const RESTORE_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(500);

/// Manages the `.bak` sibling kept while an executable is swapped.
///
/// The backup is made by renaming, never copying: the target and its backup
/// share a directory, so the rename is atomic and the live binary's bytes are
/// never rewritten. The backup is retained after a successful swap so a user
/// can roll back by hand.
///
/// # Backup Location
///
/// `<target>.bak`, e.g. `/home/user/bin/cloudsqlctl` backs up to
/// `/home/user/bin/cloudsqlctl.bak`.
#[derive(Debug, Clone)]
pub struct BackupManager {
    original_path: PathBuf,
    backup_path: PathBuf,
}

impl BackupManager {
    /// Uses an explicit backup location, as recorded in a swap request.
    pub const fn with_backup_path(executable_path: PathBuf, backup_path: PathBuf) -> Self {
        Self {
            original_path: executable_path,
            backup_path,
        }
    }

    /// `<path>.bak`.
    pub fn backup_path_for(path: &Path) -> PathBuf {
        sibling_path(path, BACKUP_SUFFIX)
    }

    /// Moves the original out of the way, replacing any stale backup.
    ///
    /// Returns `Ok(false)` when there is no original to back up.
    pub async fn move_aside(&self) -> Result<bool> {
        if !self.original_path.exists() {
            debug!("Nothing to back up at {}", self.original_path.display());
            return Ok(false);
        }

        if self.backup_path.exists() {
            debug!("Removing stale backup at {}", self.backup_path.display());
            fs::remove_file(&self.backup_path)
                .await
                .map_err(|e| UpgradeError::io("remove stale backup", &self.backup_path, e))?;
        }

        info!("Backing up {} to {}", self.original_path.display(), self.backup_path.display());
        fs::rename(&self.original_path, &self.backup_path)
            .await
            .map_err(|e| UpgradeError::io("move executable to backup", &self.original_path, e))?;
        Ok(true)
    }

    /// Puts the backup back in place of the original.
    ///
    /// Retried a few times because Windows may briefly hold the file after
    /// a failed promote.
    pub async fn restore(&self) -> Result<()> {
        if !self.backup_path.exists() {
            return Err(UpgradeError::SwapFailed {
                reason: format!("no backup found at {}", self.backup_path.display()),
            });
        }

        warn!("Restoring from backup at {}", self.backup_path.display());

        let mut attempt = 1;
        loop {
            match self.attempt_restore().await {
                Ok(()) => {
                    info!("Restored {}", self.original_path.display());
                    return Ok(());
                }
                Err(e) if attempt < RESTORE_ATTEMPTS => {
                    warn!("Restore attempt {} failed: {}. Retrying...", attempt, e);
                    tokio::time::sleep(RESTORE_RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt_restore(&self) -> Result<()> {
        if self.original_path.exists() {
            fs::remove_file(&self.original_path)
                .await
                .map_err(|e| UpgradeError::io("remove failed replacement", &self.original_path, e))?;
        }
        fs::rename(&self.backup_path, &self.original_path)
            .await
            .map_err(|e| UpgradeError::io("restore backup", &self.backup_path, e))
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }
}
