//! Picks the release asset that matches how cloudsqlctl was installed.

use crate::core::{Result, UpgradeError};
use crate::upgrade::config::UpgradeConfig;
use crate::upgrade::release::{Asset, ReleaseInfo};
use crate::utils::platform::is_package_managed;
use regex::Regex;
use serde::Serialize;
use std::path::Path;

/// How the running binary was installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallContext {
    /// Installed by the setup package into a system location.
    Installer,
    /// A bare executable the user placed somewhere.
    Portable,
}

impl std::fmt::Display for InstallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Installer => write!(f, "installer"),
            Self::Portable => write!(f, "portable"),
        }
    }
}

/// User-facing asset hint (`--asset`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum AssetMode {
    /// Detect from the executable location.
    #[default]
    Auto,
    Installer,
    /// Bare executable.
    #[value(name = "exe")]
    Portable,
}

/// Classifies an executable path.
#[must_use]
pub fn detect_install_context(exe_path: &Path) -> InstallContext {
    if is_package_managed(exe_path) { InstallContext::Installer } else { InstallContext::Portable }
}

/// Chooses the asset for `mode`, resolving `Auto` from `exe_path`.
///
/// Pure: the same inputs always yield the same asset, and the first asset
/// whose name matches the context's pattern wins.
pub fn select_asset(
    release: &ReleaseInfo,
    mode: AssetMode,
    exe_path: &Path,
    config: &UpgradeConfig,
) -> Result<(InstallContext, Asset)> {
    let context = match mode {
        AssetMode::Auto => detect_install_context(exe_path),
        AssetMode::Installer => InstallContext::Installer,
        AssetMode::Portable => InstallContext::Portable,
    };

    let pattern = match context {
        InstallContext::Installer => &config.installer_pattern,
        InstallContext::Portable => &config.portable_pattern,
    };
    let regex = Regex::new(pattern).map_err(|e| UpgradeError::InvalidPattern {
        pattern: pattern.clone(),
        reason: e.to_string(),
    })?;

    release
        .assets
        .iter()
        .find(|a| regex.is_match(&a.name))
        .cloned()
        .map(|asset| (context, asset))
        .ok_or_else(|| UpgradeError::AssetNotFound {
            pattern: pattern.clone(),
            context: context.to_string(),
        })
}
