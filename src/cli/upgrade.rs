//! Self-update command.
//!
//! # Examples
//!
//! ```bash
//! cloudsqlctl upgrade --check-only             # Report whether an update exists
//! cloudsqlctl upgrade                          # Install the latest stable release
//! cloudsqlctl upgrade --channel beta           # Install the latest prerelease
//! cloudsqlctl upgrade --version 0.5.0 --force  # Reinstall a specific release
//! cloudsqlctl upgrade --asset exe --no-install --dir ./dl
//! cloudsqlctl upgrade --json                   # One JSON object on stdout
//! ```
//!
//! A portable upgrade ends by handing off to a detached supervisor; this
//! process exits right after printing the result so the supervisor can swap
//! the binary.

use crate::config::GlobalConfig;
use crate::upgrade::asset::AssetMode;
use crate::upgrade::config::Channel;
use crate::upgrade::orchestrator::{UpgradeOptions, UpgradeOrchestrator, UpgradeOutcome, UpgradeReport};
use crate::upgrade::release::ReleaseSelector;
use crate::upgrade::transport::{RetryPolicy, RetryingTransport};
use crate::upgrade::version_check::FileCheckStore;
use crate::upgrade::NativeLauncher;
use crate::utils::platform::{default_download_dir, expand_path};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;

/// Command to upgrade cloudsqlctl to a newer version.
#[derive(Args, Debug)]
pub struct UpgradeCommand {
    /// Only check whether an update is available
    #[arg(long)]
    pub check_only: bool,

    /// Download and verify, but do not install
    #[arg(long)]
    pub no_install: bool,

    /// Which asset to install
    #[arg(long, value_enum, default_value_t = AssetMode::Auto)]
    pub asset: AssetMode,

    /// Download directory
    #[arg(long, value_name = "PATH")]
    pub dir: Option<String>,

    /// Install even if the release is not newer
    #[arg(long)]
    pub force: bool,

    /// Show the installer UI
    #[arg(long)]
    pub no_silent: bool,

    /// Never prompt for administrator rights
    #[arg(long)]
    pub no_elevate: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,

    /// Release channel (ignored with --version)
    #[arg(long, value_enum)]
    pub channel: Option<Channel>,

    /// Install a specific release tag
    #[arg(long, value_name = "TAG")]
    pub version: Option<String>,
}

impl UpgradeCommand {
    pub(super) fn selector(&self, default_channel: Channel) -> ReleaseSelector {
        match (&self.version, self.channel.unwrap_or(default_channel)) {
            (Some(tag), _) => ReleaseSelector::Tag(tag.clone()),
            (None, Channel::Stable) => ReleaseSelector::LatestStable,
            (None, Channel::Beta) => ReleaseSelector::LatestPrerelease,
        }
    }

    pub(super) fn download_dir(&self, config: &GlobalConfig) -> Result<PathBuf> {
        let dir = match self.dir.as_deref().or(config.upgrade.download_dir.as_deref()) {
            Some(dir) => expand_path(dir)?,
            None => default_download_dir()?,
        };
        Ok(dir)
    }

    pub async fn execute(self, config: &GlobalConfig, show_progress: bool) -> Result<()> {
        let current_exe = std::env::current_exe().context("Failed to locate the running executable")?;
        let target_exe = current_exe.canonicalize().unwrap_or_else(|_| current_exe.clone());

        let options = UpgradeOptions {
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            selector: self.selector(config.upgrade.channel),
            asset_mode: self.asset,
            download_dir: self.download_dir(config)?,
            force: self.force,
            check_only: self.check_only,
            no_install: self.no_install,
            silent: !self.no_silent,
            elevate: !self.no_elevate,
            target_exe,
            supervisor_program: current_exe,
            pid: std::process::id(),
            missing_checksum: config.upgrade.missing_checksum,
            show_progress,
        };

        let transport = RetryingTransport::new(RetryPolicy::default(), super::github_token())?;
        let store = FileCheckStore::new()?;
        let launcher = NativeLauncher;
        let orchestrator = UpgradeOrchestrator::new(&config.upgrade, &transport, &launcher, &store);

        if !self.json {
            println!("{}", "Checking for updates...".cyan());
        }
        let report = orchestrator.run(&options).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }

        if report.outcome.requires_exit() {
            std::io::stdout().flush().ok();
            std::process::exit(0);
        }
        Ok(())
    }
}

fn print_report(report: &UpgradeReport) {
    let status = &report.status;
    match &report.outcome {
        UpgradeOutcome::UpToDate => {
            println!(
                "{}",
                format!("You are on the latest version ({})", status.current_version).green()
            );
        }
        UpgradeOutcome::CheckOnly if status.update_available => {
            println!(
                "{}",
                format!("Update available: {} -> {}", status.current_version, status.latest_version)
                    .green()
            );
            println!("Run `cloudsqlctl upgrade` to install it");
        }
        UpgradeOutcome::CheckOnly => {
            println!(
                "{}",
                format!(
                    "No update available (current {}, latest {})",
                    status.current_version, status.latest_version
                )
                .green()
            );
        }
        UpgradeOutcome::Downloaded {
            path,
        } => {
            println!("{}", format!("Downloaded and verified {}", status.latest_version).green());
            println!("  {}", path.display());
        }
        UpgradeOutcome::InstallerApplied {
            ..
        } => {
            println!(
                "{}",
                format!("Upgraded {} -> {}", status.current_version, status.latest_version).green()
            );
        }
        UpgradeOutcome::Handoff {
            request,
            ..
        } => {
            println!(
                "{}",
                format!("Installing {} after cloudsqlctl exits...", status.latest_version).cyan()
            );
            println!("  Swap request: {}", request.display());
        }
    }
}
