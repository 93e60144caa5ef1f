//! End-to-end upgrade flow.
//!
//! [`UpgradeOrchestrator::run`] sequences resolve, select-asset,
//! fetch-manifest, download, verify and apply. Every failure comes back as a
//! [`StageFailure`] naming the step that failed, and no install location is
//! touched before the artifact is verified.

use crate::core::{Result, Stage, StageExt, StageFailure, UpgradeError};
use crate::upgrade::asset::{AssetMode, InstallContext, select_asset};
use crate::upgrade::config::{MissingChecksumPolicy, UpgradeConfig};
use crate::upgrade::launcher::Launcher;
use crate::upgrade::lock::UpgradeLock;
use crate::upgrade::release::{ReleaseResolver, ReleaseSelector, UpdateStatus};
use crate::upgrade::swap::{ApplyOptions, ApplyOutcome, SwapExecutor};
use crate::upgrade::transport::RetryingTransport;
use crate::upgrade::verification::ChecksumVerifier;
use crate::upgrade::version_check::{CheckRecord, CheckStore};
use crate::utils::platform::same_path;
use crate::utils::progress::DownloadProgress;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

/// Per-invocation options.
#[derive(Debug, Clone)]
pub struct UpgradeOptions {
    /// Version of the running binary.
    pub current_version: String,
    pub selector: ReleaseSelector,
    pub asset_mode: AssetMode,
    pub download_dir: PathBuf,
    /// Reinstall even when the release is not newer.
    pub force: bool,
    /// Stop after resolving; download nothing, write nothing.
    pub check_only: bool,
    /// Stop after the verified download is promoted.
    pub no_install: bool,
    pub silent: bool,
    pub elevate: bool,
    /// Executable being upgraded.
    pub target_exe: PathBuf,
    /// Program run as the swap supervisor, normally the current executable.
    pub supervisor_program: PathBuf,
    /// Pid the supervisor waits on, normally this process.
    pub pid: u32,
    pub missing_checksum: MissingChecksumPolicy,
    pub show_progress: bool,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UpgradeOutcome {
    UpToDate,
    CheckOnly,
    Downloaded {
        path: PathBuf,
    },
    InstallerApplied {
        path: PathBuf,
    },
    /// A supervisor will swap the binary once this process exits.
    #[serde(rename_all = "camelCase")]
    Handoff {
        request: PathBuf,
        supervisor_pid: u32,
    },
}

impl UpgradeOutcome {
    /// Whether the caller must exit so a supervisor can finish.
    pub const fn requires_exit(&self) -> bool {
        matches!(self, Self::Handoff { .. })
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct UpgradeReport {
    pub status: UpdateStatus,
    pub outcome: UpgradeOutcome,
}

/// Ties the upgrade components together for one invocation.
pub struct UpgradeOrchestrator<'a, L: Launcher, S: CheckStore> {
    config: &'a UpgradeConfig,
    transport: &'a RetryingTransport,
    launcher: &'a L,
    store: &'a S,
}

impl<'a, L: Launcher, S: CheckStore> UpgradeOrchestrator<'a, L, S> {
    pub const fn new(
        config: &'a UpgradeConfig,
        transport: &'a RetryingTransport,
        launcher: &'a L,
        store: &'a S,
    ) -> Self {
        Self {
            config,
            transport,
            launcher,
            store,
        }
    }

    pub async fn run(&self, options: &UpgradeOptions) -> Result<UpgradeReport, StageFailure> {
        let resolver = ReleaseResolver::new(self.transport, self.config);
        let mut status = resolver
            .check(&options.current_version, &options.selector)
            .await
            .at_stage(Stage::Resolve)?;

        if let Err(e) = self.store.save(&CheckRecord::from_status(&status)).await {
            warn!("Could not record update check: {}", e);
        }

        if options.check_only {
            return Ok(UpgradeReport {
                status,
                outcome: UpgradeOutcome::CheckOnly,
            });
        }

        if !status.update_available && !options.force {
            info!("cloudsqlctl {} is up to date", options.current_version);
            return Ok(UpgradeReport {
                status,
                outcome: UpgradeOutcome::UpToDate,
            });
        }

        let release = status.release.take().ok_or_else(|| {
            StageFailure::new(
                Stage::Resolve,
                UpgradeError::NotFound {
                    what: options.selector.to_string(),
                },
            )
        })?;

        let (context, asset) =
            select_asset(&release, options.asset_mode, &options.target_exe, self.config)
                .at_stage(Stage::SelectAsset)?;
        info!("Selected {} ({} install)", asset.name, context);

        let expected = self.expected_checksum(&release, &asset.name, options).await?;

        let promoted = options.download_dir.join(&asset.name);
        if same_path(&promoted, &options.target_exe) {
            return Err(StageFailure::new(
                Stage::Download,
                UpgradeError::Config {
                    message: format!(
                        "download directory {} would overwrite the running executable {}",
                        options.download_dir.display(),
                        options.target_exe.display()
                    ),
                },
            ));
        }

        let lock_path = UpgradeLock::path_in(&options.download_dir);
        let _lock = UpgradeLock::acquire(&lock_path, self.config.lock_timeout())
            .await
            .at_stage(Stage::Download)?;

        let progress = if options.show_progress {
            DownloadProgress::new(format!("Downloading {}", asset.name))
        } else {
            DownloadProgress::hidden()
        };

        let mut executor = SwapExecutor::new(self.launcher);
        let downloaded = executor
            .download(self.transport, &asset, &options.download_dir, &progress)
            .await
            .at_stage(Stage::Download)?;
        let verified = executor.verify(downloaded, expected.as_deref()).await.at_stage(Stage::Verify)?;

        status.release = Some(release);

        if options.no_install {
            info!("Downloaded {}", verified.path().display());
            return Ok(UpgradeReport {
                status,
                outcome: UpgradeOutcome::Downloaded {
                    path: verified.path().to_path_buf(),
                },
            });
        }

        let apply = ApplyOptions {
            target_exe: options.target_exe.clone(),
            supervisor_program: options.supervisor_program.clone(),
            pid: options.pid,
            silent: options.silent,
            elevate: options.elevate,
            lock_path: (context == InstallContext::Portable).then(|| lock_path.clone()),
            supervisor_wait: self.config.supervisor_wait(),
        };
        let outcome = match executor.apply(&verified, context, &apply).await.at_stage(Stage::Apply)? {
            ApplyOutcome::InstallerApplied {
                installer,
            } => UpgradeOutcome::InstallerApplied {
                path: installer,
            },
            ApplyOutcome::Handoff {
                request_path,
                supervisor_pid,
                ..
            } => UpgradeOutcome::Handoff {
                request: request_path,
                supervisor_pid,
            },
        };

        Ok(UpgradeReport {
            status,
            outcome,
        })
    }

    /// Looks up the published digest for `asset`, applying the
    /// missing-checksum policy before anything is downloaded.
    async fn expected_checksum(
        &self,
        release: &crate::upgrade::release::ReleaseInfo,
        asset: &str,
        options: &UpgradeOptions,
    ) -> Result<Option<String>, StageFailure> {
        let verifier = ChecksumVerifier::new(self.transport, self.config.manifest_asset.clone());
        let warn_only = options.missing_checksum == MissingChecksumPolicy::Warn;

        let manifest = match verifier.fetch_manifest(release).await {
            Ok(manifest) => manifest,
            Err(UpgradeError::ManifestNotFound {
                manifest,
                tag,
            }) if warn_only => {
                warn!("{} is not published for {}; skipping verification", manifest, tag);
                return Ok(None);
            }
            Err(e) => return Err(StageFailure::new(Stage::FetchManifest, e)),
        };

        match manifest.get(asset) {
            Some(hash) => Ok(Some(hash.to_string())),
            None if warn_only => {
                warn!("No checksum for {} in {}", asset, self.config.manifest_asset);
                Ok(None)
            }
            None => Err(StageFailure::new(
                Stage::FetchManifest,
                UpgradeError::ChecksumUnavailable {
                    asset: asset.to_string(),
                    manifest: self.config.manifest_asset.clone(),
                },
            )),
        }
    }
}
