//! Swap executor: takes a downloaded asset through verification to an
//! installed binary.
//!
//! The executor is a small state machine:
//!
//! ```text
//! Idle -> Downloaded -> Verified -> Applying -> Applied
//!   \________\_____________\__________\______-> Failed
//! ```
//!
//! The artifact types mirror those states. A [`DownloadedArtifact`] can only
//! become a [`VerifiedArtifact`] through [`SwapExecutor::verify`], and only a
//! `VerifiedArtifact` can be applied, so an unverified file never reaches an
//! install location.
//!
//! # Portable swaps
//!
//! A running executable cannot be overwritten on Windows, and rewriting it
//! in place is unsafe everywhere. A portable apply therefore stages the new
//! binary as `<target>.new`, writes a [`SwapRequest`] next to the target, and
//! starts a copy of this binary as a detached supervisor
//! (`apply-swap --request <file>`). The caller then exits; the supervisor
//! waits for that exit and performs the renames (see
//! [`supervisor`](crate::upgrade::supervisor)).
//!
//! Supervisor failures happen after this process is gone and can only be
//! read from `<target>.swap.log`.

use crate::constants::{
    DOWNLOAD_SUFFIX, SILENT_INSTALLER_ARGS, STAGED_SUFFIX, SWAP_LOG_SUFFIX, SWAP_REQUEST_SUFFIX,
    SWAP_REQUEST_VERSION,
};
use crate::core::{Result, UpgradeError};
use crate::upgrade::asset::InstallContext;
use crate::upgrade::backup::BackupManager;
use crate::upgrade::launcher::Launcher;
use crate::upgrade::release::Asset;
use crate::upgrade::transport::RetryingTransport;
use crate::upgrade::verification::ChecksumVerifier;
use crate::utils::platform::{is_system_scope, sibling_path};
use crate::utils::progress::DownloadProgress;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// File name of the supervisor copy placed next to the target.
pub fn supervisor_file_name() -> String {
    format!(".cloudsqlctl-supervisor{}", std::env::consts::EXE_SUFFIX)
}

/// Lifecycle of one upgrade attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapState {
    Idle,
    Downloaded,
    Verified,
    Applying,
    Applied,
    Failed,
}

impl SwapState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Failed)
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Idle, Self::Downloaded)
            | (Self::Downloaded, Self::Verified)
            | (Self::Verified, Self::Applying)
            | (Self::Applying, Self::Applied) => true,
            (_, Self::Failed) => !self.is_terminal(),
            _ => false,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Downloaded => "downloaded",
            Self::Verified => "verified",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SwapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully downloaded but not yet trusted asset at `<dir>/<asset>.download`.
#[derive(Debug)]
pub struct DownloadedArtifact {
    asset: Asset,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl DownloadedArtifact {
    pub fn path(&self) -> &Path {
        &self.temp_path
    }

    pub const fn asset(&self) -> &Asset {
        &self.asset
    }
}

/// An asset promoted to `<dir>/<asset>` after verification.
#[derive(Debug, Clone)]
pub struct VerifiedArtifact {
    asset: Asset,
    path: PathBuf,
    checksum_verified: bool,
}

impl VerifiedArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn asset(&self) -> &Asset {
        &self.asset
    }

    /// `false` when the missing-checksum policy let it through unverified.
    pub const fn checksum_verified(&self) -> bool {
        self.checksum_verified
    }
}

/// Descriptor handed to the swap supervisor, stored as `<target>.swap.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub version: u32,
    /// Process that must exit before the target is touched.
    pub pid: u32,
    pub new_path: PathBuf,
    pub target_path: PathBuf,
    pub backup_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_path: Option<PathBuf>,
    /// Arguments for the single post-swap launch of the target.
    #[serde(default)]
    pub launch_args: Vec<String>,
}

impl SwapRequest {
    /// `<target>.swap.json`.
    pub fn path_for(target: &Path) -> PathBuf {
        sibling_path(target, SWAP_REQUEST_SUFFIX)
    }

    /// `<target>.swap.log`.
    pub fn log_path_for(target: &Path) -> PathBuf {
        sibling_path(target, SWAP_LOG_SUFFIX)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| UpgradeError::io("read swap request", path, e))?;
        let request: Self = serde_json::from_str(&text).map_err(|e| UpgradeError::Config {
            message: format!("invalid swap request {}: {e}", path.display()),
        })?;
        if request.version != SWAP_REQUEST_VERSION {
            return Err(UpgradeError::Config {
                message: format!(
                    "unsupported swap request version {} (expected {})",
                    request.version, SWAP_REQUEST_VERSION
                ),
            });
        }
        Ok(request)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| UpgradeError::Config {
            message: format!("failed to serialize swap request: {e}"),
        })?;
        tokio::fs::write(path, json).await.map_err(|e| UpgradeError::io("write swap request", path, e))
    }
}

/// Inputs for [`SwapExecutor::apply`].
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Executable being replaced.
    pub target_exe: PathBuf,
    /// Program copied next to the target and run as the supervisor.
    pub supervisor_program: PathBuf,
    /// Pid the supervisor waits on.
    pub pid: u32,
    /// Pass unattended flags to the installer.
    pub silent: bool,
    /// Allow prompting for elevation.
    pub elevate: bool,
    /// Upgrade lock the supervisor re-acquires before moving files.
    pub lock_path: Option<PathBuf>,
    /// Supervisor wait budget, forwarded on its command line.
    pub supervisor_wait: Duration,
}

/// What `apply` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The installer ran to completion.
    InstallerApplied { installer: PathBuf },
    /// The supervisor was started; the caller must exit so it can swap.
    Handoff {
        request_path: PathBuf,
        request: SwapRequest,
        supervisor_pid: u32,
    },
}

/// Drives one artifact through download, verification and apply.
pub struct SwapExecutor<'a, L: Launcher> {
    launcher: &'a L,
    state: SwapState,
}

impl<'a, L: Launcher> SwapExecutor<'a, L> {
    pub const fn new(launcher: &'a L) -> Self {
        Self {
            launcher,
            state: SwapState::Idle,
        }
    }

    pub const fn state(&self) -> SwapState {
        self.state
    }

    fn transition(&mut self, next: SwapState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(UpgradeError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!("Swap state {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Moves to `Failed` unless already terminal.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            debug!("Swap state {} -> failed", self.state);
            self.state = SwapState::Failed;
        }
    }

    fn failed<T>(&mut self, error: UpgradeError) -> Result<T> {
        self.fail();
        Err(error)
    }

    /// Streams `asset` into `<dir>/<asset>.download`.
    pub async fn download(
        &mut self,
        transport: &RetryingTransport,
        asset: &Asset,
        dir: &Path,
        progress: &DownloadProgress,
    ) -> Result<DownloadedArtifact> {
        if self.state != SwapState::Idle {
            return Err(UpgradeError::InvalidTransition {
                from: self.state.to_string(),
                to: SwapState::Downloaded.to_string(),
            });
        }

        let final_path = dir.join(&asset.name);
        let temp_path = sibling_path(&final_path, DOWNLOAD_SUFFIX);

        info!("Downloading {} to {}", asset.name, dir.display());
        if let Err(e) = transport.download_to_file(&asset.url, &temp_path, progress).await {
            return self.failed(e);
        }

        self.transition(SwapState::Downloaded)?;
        Ok(DownloadedArtifact {
            asset: asset.clone(),
            temp_path,
            final_path,
        })
    }

    /// Checks the artifact against `expected` and promotes it.
    ///
    /// `expected = None` means no checksum is published and the policy
    /// allows proceeding; the artifact is promoted unverified. A mismatch
    /// deletes the temporary file and fails with `ChecksumMismatch`.
    pub async fn verify(
        &mut self,
        artifact: DownloadedArtifact,
        expected: Option<&str>,
    ) -> Result<VerifiedArtifact> {
        if self.state != SwapState::Downloaded {
            return Err(UpgradeError::InvalidTransition {
                from: self.state.to_string(),
                to: SwapState::Verified.to_string(),
            });
        }

        let checksum_verified = match expected {
            Some(expected) => match ChecksumVerifier::verify(&artifact.temp_path, expected).await {
                Ok(true) => true,
                Ok(false) => {
                    let actual = ChecksumVerifier::compute_sha256(&artifact.temp_path)
                        .await
                        .unwrap_or_else(|_| "unreadable".to_string());
                    discard(&artifact.temp_path).await;
                    return self.failed(UpgradeError::ChecksumMismatch {
                        name: artifact.asset.name.clone(),
                        expected: expected.trim().to_lowercase(),
                        actual,
                    });
                }
                Err(e) => {
                    discard(&artifact.temp_path).await;
                    return self.failed(e);
                }
            },
            None => {
                warn!("No checksum published for {}; continuing unverified", artifact.asset.name);
                false
            }
        };

        if let Err(e) = tokio::fs::rename(&artifact.temp_path, &artifact.final_path).await {
            discard(&artifact.temp_path).await;
            return self.failed(UpgradeError::io("promote download", &artifact.temp_path, e));
        }

        self.transition(SwapState::Verified)?;
        Ok(VerifiedArtifact {
            asset: artifact.asset,
            path: artifact.final_path,
            checksum_verified,
        })
    }

    /// Installs a verified artifact according to `context`.
    pub async fn apply(
        &mut self,
        artifact: &VerifiedArtifact,
        context: InstallContext,
        options: &ApplyOptions,
    ) -> Result<ApplyOutcome> {
        self.transition(SwapState::Applying)?;

        let result = match context {
            InstallContext::Installer => self.apply_installer(artifact, options).await,
            InstallContext::Portable => self.apply_portable(artifact, options).await,
        };

        match result {
            Ok(outcome) => {
                self.transition(SwapState::Applied)?;
                Ok(outcome)
            }
            Err(e) => self.failed(e),
        }
    }

    async fn apply_installer(
        &self,
        artifact: &VerifiedArtifact,
        options: &ApplyOptions,
    ) -> Result<ApplyOutcome> {
        let needs_elevation =
            is_system_scope(&options.target_exe) && !self.launcher.is_elevated();
        if needs_elevation && !options.elevate {
            return Err(UpgradeError::ElevationRequired {
                operation: format!("install into {}", display_parent(&options.target_exe)),
            });
        }

        let args: Vec<String> = if options.silent {
            SILENT_INSTALLER_ARGS.iter().map(ToString::to_string).collect()
        } else {
            Vec::new()
        };

        self.launcher.run_installer(artifact.path(), &args, needs_elevation).await?;
        info!("Installer {} completed", artifact.asset.name);
        Ok(ApplyOutcome::InstallerApplied {
            installer: artifact.path.clone(),
        })
    }

    async fn apply_portable(
        &self,
        artifact: &VerifiedArtifact,
        options: &ApplyOptions,
    ) -> Result<ApplyOutcome> {
        let target = &options.target_exe;
        let target_dir = target.parent().ok_or_else(|| UpgradeError::SwapFailed {
            reason: format!("{} has no parent directory", target.display()),
        })?;

        if is_system_scope(target) && !self.launcher.is_elevated() {
            return Err(UpgradeError::ElevationRequired {
                operation: format!("replace {}", target.display()),
            });
        }

        let supervisor = target_dir.join(supervisor_file_name());
        let staged = sibling_path(target, STAGED_SUFFIX);
        let request_path = SwapRequest::path_for(target);

        remove_stale(&supervisor).await;
        remove_stale(&staged).await;

        let handoff: Result<ApplyOutcome> = async {
            copy_executable(artifact.path(), &staged).await?;
            copy_executable(&options.supervisor_program, &supervisor).await?;

            let request = SwapRequest {
                version: SWAP_REQUEST_VERSION,
                pid: options.pid,
                new_path: staged.clone(),
                target_path: target.clone(),
                backup_path: BackupManager::backup_path_for(target),
                lock_path: options.lock_path.clone(),
                launch_args: vec!["--version".to_string()],
            };
            request.save(&request_path).await?;

            let args: Vec<OsString> = vec![
                "apply-swap".into(),
                "--request".into(),
                request_path.clone().into_os_string(),
                "--wait-secs".into(),
                options.supervisor_wait.as_secs().to_string().into(),
            ];
            let supervisor_pid = self.launcher.spawn_detached(
                &supervisor,
                &args,
                &SwapRequest::log_path_for(target),
            )?;

            Ok::<_, UpgradeError>(ApplyOutcome::Handoff {
                request_path: request_path.clone(),
                request,
                supervisor_pid,
            })
        }
        .await;

        if handoff.is_err() {
            remove_stale(&staged).await;
            remove_stale(&request_path).await;
        }
        handoff
    }
}

fn display_parent(path: &Path) -> String {
    path.parent().unwrap_or(path).display().to_string()
}

/// Copies an executable, flushes it to disk and marks it executable.
async fn copy_executable(from: &Path, to: &Path) -> Result<()> {
    tokio::fs::copy(from, to).await.map_err(|e| UpgradeError::io("copy executable", to, e))?;

    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(to)
        .await
        .map_err(|e| UpgradeError::io("open staged executable", to, e))?;
    file.sync_all().await.map_err(|e| UpgradeError::io("sync staged executable", to, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(to, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| UpgradeError::io("set executable permissions", to, e))?;
    }

    Ok(())
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to delete {}: {}", path.display(), e);
        }
    } else {
        debug!("Deleted {}", path.display());
    }
}

async fn remove_stale(path: &Path) {
    if path.exists() {
        debug!("Removing leftover {}", path.display());
        discard(path).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use SwapState::*;
        assert!(Idle.can_transition_to(Downloaded));
        assert!(Downloaded.can_transition_to(Verified));
        assert!(Verified.can_transition_to(Applying));
        assert!(Applying.can_transition_to(Applied));
    }

    #[test]
    fn test_failed_reachable_from_every_non_terminal_state() {
        use SwapState::*;
        for state in [Idle, Downloaded, Verified, Applying] {
            assert!(state.can_transition_to(Failed), "{state} -> failed");
        }
        assert!(!Applied.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn test_skipping_verification_is_rejected() {
        use SwapState::*;
        assert!(!Downloaded.can_transition_to(Applying));
        assert!(!Idle.can_transition_to(Verified));
        assert!(!Idle.can_transition_to(Applying));
        assert!(!Applied.can_transition_to(Idle));
        assert!(!Failed.can_transition_to(Downloaded));
    }

    #[test]
    fn test_swap_request_json_shape() {
        let request = SwapRequest {
            version: SWAP_REQUEST_VERSION,
            pid: 42,
            new_path: "/bin/c.new".into(),
            target_path: "/bin/c".into(),
            backup_path: "/bin/c.bak".into(),
            lock_path: None,
            launch_args: vec!["--version".into()],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["pid"], 42);
        assert_eq!(value["newPath"], "/bin/c.new");
        assert_eq!(value["backupPath"], "/bin/c.bak");
        assert!(value.get("lockPath").is_none());
    }

    #[tokio::test]
    async fn test_swap_request_rejects_unknown_version() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("c.swap.json");
        tokio::fs::write(
            &path,
            r#"{"version":2,"pid":1,"newPath":"a","targetPath":"b","backupPath":"c"}"#,
        )
        .await
        .unwrap();
        let err = SwapRequest::load(&path).await.unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }

    #[test]
    fn test_supervisor_name_is_hidden() {
        assert!(supervisor_file_name().starts_with(".cloudsqlctl-supervisor"));
    }
}
