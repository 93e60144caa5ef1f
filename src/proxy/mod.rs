//! Cloud SQL Proxy installer.
//!
//! Proxy releases are tagged on GitHub, but the v2 binaries are served from
//! Google's storage bucket at
//! `{download_base_url}/{version}/{asset}`, each with a `.sha256` sidecar.
//! [`ProxyUpdater::install`] downloads through the shared retrying transport,
//! verifies the binary against its sidecar, and renames it over the install
//! path only after the digest matches.

mod config;

pub use config::ProxyConfig;

use crate::core::{Result, UpgradeError};
use crate::upgrade::release::normalize_tag;
use crate::upgrade::transport::RetryingTransport;
use crate::upgrade::verification::ChecksumVerifier;
use crate::utils::progress::DownloadProgress;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};

static SHA256_HEX: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?i)[a-f0-9]{64}").ok());

/// Result of a proxy install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyInstall {
    pub version: String,
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Deserialize)]
struct LatestRelease {
    tag_name: String,
}

/// Proxy binary name published for the current platform.
pub fn platform_asset_name() -> Result<&'static str> {
    let name = match (std::env::consts::OS, std::env::consts::ARCH) {
        ("windows", "x86_64") => "cloud-sql-proxy.x64.exe",
        ("windows", "x86") => "cloud-sql-proxy.x86.exe",
        ("linux", "x86_64") => "cloud-sql-proxy.linux.amd64",
        ("linux", "aarch64") => "cloud-sql-proxy.linux.arm64",
        ("macos", "x86_64") => "cloud-sql-proxy.darwin.amd64",
        ("macos", "aarch64") => "cloud-sql-proxy.darwin.arm64",
        (os, arch) => {
            return Err(UpgradeError::Config {
                message: format!("no Cloud SQL Proxy build for {os}/{arch}"),
            });
        }
    };
    Ok(name)
}

/// First SHA-256 digest found in a sidecar file, lowercased.
pub fn parse_sidecar(text: &str) -> Option<String> {
    SHA256_HEX.as_ref()?.find(text).map(|m| m.as_str().to_lowercase())
}

/// Resolves and installs Cloud SQL Proxy releases.
pub struct ProxyUpdater<'a> {
    transport: &'a RetryingTransport,
    config: &'a ProxyConfig,
}

impl<'a> ProxyUpdater<'a> {
    pub const fn new(transport: &'a RetryingTransport, config: &'a ProxyConfig) -> Self {
        Self {
            transport,
            config,
        }
    }

    /// Tag of the latest proxy release.
    pub async fn latest_version(&self) -> Result<String> {
        let url = format!(
            "{}/repos/{}/releases/latest",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.repo
        );
        let release: LatestRelease = self.transport.get_json(&url).await?;
        debug!("Latest Cloud SQL Proxy release is {}", release.tag_name);
        Ok(release.tag_name)
    }

    /// Download URL of `asset` for `version`.
    pub fn download_url(&self, version: &str, asset: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.download_base_url.trim_end_matches('/'),
            normalize_tag(version),
            asset
        )
    }

    /// Installs `version` at `target`, replacing any existing binary.
    pub async fn install(
        &self,
        version: &str,
        target: &Path,
        progress: &DownloadProgress,
    ) -> Result<ProxyInstall> {
        let version = normalize_tag(version);
        let asset = platform_asset_name()?;
        let url = self.download_url(&version, asset);
        let sidecar_url = format!("{url}.sha256");

        let sidecar = self.transport.get_asset_text(&sidecar_url).await?;
        let expected = parse_sidecar(&sidecar).ok_or_else(|| UpgradeError::InvalidResponse {
            url: sidecar_url.clone(),
            reason: "no SHA256 digest in checksum file".to_string(),
        })?;

        let dir = target.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| UpgradeError::io("create install directory", dir, e))?;

        // Same directory as the target so the final rename is atomic.
        let temp = tempfile::Builder::new()
            .prefix(".cloud-sql-proxy")
            .suffix(".download")
            .tempfile_in(dir)
            .map_err(|e| UpgradeError::io("create temporary file", dir, e))?
            .into_temp_path();

        info!("Downloading {} {} from {}", asset, version, url);
        self.transport.download_to_file(&url, &temp, progress).await?;

        let actual = ChecksumVerifier::compute_sha256(&temp).await?;
        if actual != expected {
            return Err(UpgradeError::ChecksumMismatch {
                name: asset.to_string(),
                expected,
                actual,
            });
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| UpgradeError::io("set executable permissions", &*temp, e))?;
        }

        temp.persist(target).map_err(|e| UpgradeError::io("install proxy", target, e.error))?;
        info!("Installed Cloud SQL Proxy {} at {}", version, target.display());

        Ok(ProxyInstall {
            version,
            path: target.to_path_buf(),
            sha256: actual,
        })
    }
}
