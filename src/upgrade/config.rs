use crate::constants::{
    CHECKSUM_MANIFEST_NAME, DEFAULT_LOCK_TIMEOUT, DEFAULT_SUPERVISOR_WAIT,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do when the checksum manifest has no entry for the selected asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingChecksumPolicy {
    /// Refuse to download or install (default).
    #[default]
    Abort,
    /// Log a warning and install without verification.
    Warn,
}

/// Release channel used when no explicit tag is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Stable,
    /// Latest prerelease.
    Beta,
}

/// Configuration settings for cloudsqlctl self-update behavior.
///
/// Read from the `[upgrade]` table of the global configuration file. Every
/// field has a default so an empty or missing table is valid.
///
/// ## TOML Example
/// ```toml
/// [upgrade]
/// repo_owner = "Kinin-Code-Offical"
/// repo_name = "cloudsqlctl"
/// missing_checksum = "abort"
/// channel = "stable"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeConfig {
    /// Owner of the GitHub repository publishing cloudsqlctl releases.
    #[serde(default = "default_repo_owner")]
    pub repo_owner: String,

    /// Name of the GitHub repository publishing cloudsqlctl releases.
    #[serde(default = "default_repo_name")]
    pub repo_name: String,

    /// Base URL of the release registry API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Exact asset name of the checksum manifest.
    #[serde(default = "default_manifest_asset")]
    pub manifest_asset: String,

    /// Regex an installer-package asset name must match.
    #[serde(default = "default_installer_pattern")]
    pub installer_pattern: String,

    /// Regex a bare-executable asset name must match.
    #[serde(default = "default_portable_pattern")]
    pub portable_pattern: String,

    /// Policy when the manifest lacks an entry for the selected asset.
    #[serde(default)]
    pub missing_checksum: MissingChecksumPolicy,

    /// Channel used when no tag is requested.
    #[serde(default)]
    pub channel: Channel,

    /// Download directory; `None` means the per-user data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<String>,

    /// Seconds to wait for a concurrent upgrade to release the lock.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// Seconds the swap supervisor waits for this process to exit.
    #[serde(default = "default_supervisor_wait_secs")]
    pub supervisor_wait_secs: u64,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            repo_owner: default_repo_owner(),
            repo_name: default_repo_name(),
            api_base_url: default_api_base_url(),
            manifest_asset: default_manifest_asset(),
            installer_pattern: default_installer_pattern(),
            portable_pattern: default_portable_pattern(),
            missing_checksum: MissingChecksumPolicy::default(),
            channel: Channel::default(),
            download_dir: None,
            lock_timeout_secs: default_lock_timeout_secs(),
            supervisor_wait_secs: default_supervisor_wait_secs(),
        }
    }
}

impl UpgradeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub const fn supervisor_wait(&self) -> Duration {
        Duration::from_secs(self.supervisor_wait_secs)
    }

    /// `{api_base_url}/repos/{owner}/{repo}` without a trailing slash.
    pub fn repo_api_url(&self) -> String {
        format!(
            "{}/repos/{}/{}",
            self.api_base_url.trim_end_matches('/'),
            self.repo_owner,
            self.repo_name
        )
    }
}

fn default_repo_owner() -> String {
    "Kinin-Code-Offical".to_string()
}

fn default_repo_name() -> String {
    "cloudsqlctl".to_string()
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_manifest_asset() -> String {
    CHECKSUM_MANIFEST_NAME.to_string()
}

fn default_installer_pattern() -> String {
    r"(?i)cloudsqlctl-setup\.exe$".to_string()
}

fn default_portable_pattern() -> String {
    r"(?i)cloudsqlctl\.exe$".to_string()
}

const fn default_lock_timeout_secs() -> u64 {
    DEFAULT_LOCK_TIMEOUT.as_secs()
}

const fn default_supervisor_wait_secs() -> u64 {
    DEFAULT_SUPERVISOR_WAIT.as_secs()
}
