//! The detached half of a portable swap.
//!
//! [`run_swap`] runs in a separate process (`cloudsqlctl apply-swap`) started
//! by the swap executor. It may outlive its parent by design and reports
//! only through its log, so every step logs what it did.
//!
//! Order of operations:
//!
//! 1. Wait for the requesting process to exit, up to the wait budget. On
//!    timeout nothing is moved.
//! 2. Take the upgrade lock if the request names one.
//! 3. Move the target to its backup (best effort; a missing target is fine).
//! 4. Rename the staged binary over the target. On failure the backup is
//!    restored.
//! 5. Launch the new target once with the requested arguments.
//! 6. Delete the request. The backup is kept.

use crate::constants::{DEFAULT_LOCK_TIMEOUT, LAUNCH_TIMEOUT, PROCESS_POLL_INTERVAL};
use crate::core::{Result, UpgradeError};
use crate::upgrade::backup::BackupManager;
use crate::upgrade::lock::UpgradeLock;
use crate::upgrade::swap::SwapRequest;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessStatus, System};
use tracing::{error, info, warn};

/// What the supervisor did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapReport {
    pub target: PathBuf,
    /// Backup location, when there was a previous binary to keep.
    pub backup: Option<PathBuf>,
    /// First line of the new binary's output, if it could be launched.
    pub launch_output: Option<String>,
}

/// Reads the request at `request_path` and performs the swap.
pub async fn run_swap(request_path: &Path, wait: Duration) -> Result<SwapReport> {
    let request = SwapRequest::load(request_path).await?;
    info!(
        "Swap request: pid {}, {} -> {}",
        request.pid,
        request.new_path.display(),
        request.target_path.display()
    );

    wait_for_exit(request.pid, wait).await?;

    let _lock = match &request.lock_path {
        Some(path) => Some(UpgradeLock::acquire(path, DEFAULT_LOCK_TIMEOUT).await?),
        None => None,
    };

    if !request.new_path.exists() {
        return Err(UpgradeError::SwapFailed {
            reason: format!("staged binary {} is missing", request.new_path.display()),
        });
    }

    let backup =
        BackupManager::with_backup_path(request.target_path.clone(), request.backup_path.clone());
    let backed_up = match backup.move_aside().await {
        Ok(moved) => moved,
        Err(e) => {
            warn!("Could not back up {}: {}", request.target_path.display(), e);
            false
        }
    };

    if let Err(e) = tokio::fs::rename(&request.new_path, &request.target_path).await {
        error!("Failed to promote {}: {}", request.new_path.display(), e);
        if backed_up {
            if let Err(restore_err) = backup.restore().await {
                return Err(UpgradeError::SwapFailed {
                    reason: format!(
                        "promote failed ({e}) and restoring {} failed ({restore_err})",
                        request.backup_path.display()
                    ),
                });
            }
        }
        return Err(UpgradeError::SwapFailed {
            reason: format!("failed to move {} into place: {e}", request.new_path.display()),
        });
    }
    info!("Installed {}", request.target_path.display());

    let launch_output = launch_once(&request.target_path, &request.launch_args).await;

    if let Err(e) = tokio::fs::remove_file(request_path).await {
        warn!("Failed to remove swap request {}: {}", request_path.display(), e);
    }

    Ok(SwapReport {
        target: request.target_path,
        backup: backed_up.then_some(request.backup_path),
        launch_output,
    })
}

/// Polls until `pid` is gone or `timeout` elapses.
pub async fn wait_for_exit(pid: u32, timeout: Duration) -> Result<()> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    let start = Instant::now();

    loop {
        let running = system.refresh_process(pid)
            && system.process(pid).is_some_and(|p| p.status() != ProcessStatus::Zombie);
        if !running {
            info!("Process {} has exited", pid);
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(UpgradeError::SwapFailed {
                reason: format!("process {} still running after {}s", pid, timeout.as_secs()),
            });
        }
        tokio::time::sleep(PROCESS_POLL_INTERVAL).await;
    }
}

async fn launch_once(target: &Path, args: &[String]) -> Option<String> {
    let output = tokio::time::timeout(
        LAUNCH_TIMEOUT,
        tokio::process::Command::new(target).args(args).kill_on_drop(true).output(),
    )
    .await;

    match output {
        Ok(Ok(output)) if output.status.success() => {
            let text = String::from_utf8_lossy(&output.stdout).lines().next().unwrap_or("").trim().to_string();
            info!("New binary reports: {}", text);
            Some(text)
        }
        Ok(Ok(output)) => {
            warn!("{} exited with {}", target.display(), output.status);
            None
        }
        Ok(Err(e)) => {
            warn!("Failed to launch {}: {}", target.display(), e);
            None
        }
        Err(_) => {
            warn!("{} did not exit within {}s", target.display(), LAUNCH_TIMEOUT.as_secs());
            None
        }
    }
}
