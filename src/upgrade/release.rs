//! Release discovery against the GitHub releases API.
//!
//! The resolver turns a [`ReleaseSelector`] into exactly one immutable
//! [`ReleaseInfo`]. Version ordering is semver after stripping a leading `v`
//! from both sides; anything that fails to parse is reported rather than
//! guessed at.

use crate::core::{Result, UpgradeError};
use crate::upgrade::config::UpgradeConfig;
use crate::upgrade::transport::RetryingTransport;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info};

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    pub url: String,
}

/// One published release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    /// Release tag, e.g. `v0.5.2`.
    pub tag: String,
    pub assets: Vec<Asset>,
    /// Release notes (markdown body).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
}

impl ReleaseInfo {
    /// Finds an asset by exact name.
    pub fn asset(&self, name: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.name == name)
    }

    /// The tag without a leading `v`.
    pub fn version(&self) -> &str {
        strip_v(&self.tag)
    }
}

/// Wire shape of a release object.
#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
}

impl From<GithubRelease> for ReleaseInfo {
    fn from(release: GithubRelease) -> Self {
        Self {
            tag: release.tag_name,
            assets: release
                .assets
                .into_iter()
                .map(|a| Asset {
                    name: a.name,
                    url: a.browser_download_url,
                })
                .collect(),
            notes: release.body.filter(|b| !b.trim().is_empty()),
            prerelease: release.prerelease,
        }
    }
}

/// Which release to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseSelector {
    LatestStable,
    LatestPrerelease,
    /// An explicit tag; `v` is prepended when missing.
    Tag(String),
}

impl std::fmt::Display for ReleaseSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LatestStable => write!(f, "latest stable release"),
            Self::LatestPrerelease => write!(f, "latest prerelease"),
            Self::Tag(tag) => write!(f, "release {}", normalize_tag(tag)),
        }
    }
}

/// Result of comparing the running version with a resolved release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatus {
    pub current_version: String,
    pub latest_version: String,
    pub update_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<ReleaseInfo>,
}

/// Resolves releases through a [`RetryingTransport`].
pub struct ReleaseResolver<'a> {
    transport: &'a RetryingTransport,
    repo_url: String,
}

impl<'a> ReleaseResolver<'a> {
    pub fn new(transport: &'a RetryingTransport, config: &UpgradeConfig) -> Self {
        Self {
            transport,
            repo_url: config.repo_api_url(),
        }
    }

    /// Fetches the release named by `selector`.
    pub async fn resolve(&self, selector: &ReleaseSelector) -> Result<ReleaseInfo> {
        debug!("Resolving {}", selector);
        let release = match selector {
            ReleaseSelector::LatestStable => {
                let url = format!("{}/releases/latest", self.repo_url);
                self.fetch_one(&url, "latest release").await?
            }
            ReleaseSelector::LatestPrerelease => {
                let url = format!("{}/releases", self.repo_url);
                let releases: Vec<GithubRelease> = self.transport.get_json(&url).await?;
                releases.into_iter().find(|r| r.prerelease && !r.draft).map(ReleaseInfo::from).ok_or_else(
                    || UpgradeError::NotFound {
                        what: "prerelease".to_string(),
                    },
                )?
            }
            ReleaseSelector::Tag(tag) => {
                let tag = normalize_tag(tag);
                let url = format!("{}/releases/tags/{}", self.repo_url, tag);
                self.fetch_one(&url, &format!("release {tag}")).await?
            }
        };

        info!("Resolved {} to {}", selector, release.tag);
        Ok(release)
    }

    /// Resolves `selector` and compares it with `current_version`.
    pub async fn check(&self, current_version: &str, selector: &ReleaseSelector) -> Result<UpdateStatus> {
        let release = self.resolve(selector).await?;
        let update_available = is_newer(&release.tag, current_version)?;
        Ok(UpdateStatus {
            current_version: current_version.to_string(),
            latest_version: release.tag.clone(),
            update_available,
            release: Some(release),
        })
    }

    async fn fetch_one(&self, url: &str, what: &str) -> Result<ReleaseInfo> {
        match self.transport.get_json::<GithubRelease>(url).await {
            Ok(release) => Ok(release.into()),
            Err(UpgradeError::HttpStatus {
                status: 404,
                ..
            }) => Err(UpgradeError::NotFound {
                what: what.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}

/// Prefixes `v` unless the tag already starts with one.
pub fn normalize_tag(tag: &str) -> String {
    let tag = tag.trim();
    if tag.starts_with('v') { tag.to_string() } else { format!("v{tag}") }
}

fn strip_v(version: &str) -> &str {
    let version = version.trim();
    version.strip_prefix('v').unwrap_or(version)
}

/// Parses a version with an optional leading `v`.
pub fn parse_version(version: &str) -> Result<Version> {
    Version::parse(strip_v(version)).map_err(|e| UpgradeError::InvalidVersion {
        version: version.to_string(),
        reason: e.to_string(),
    })
}

/// Semver ordering of two versions, each with an optional leading `v`.
pub fn compare_versions(a: &str, b: &str) -> Result<Ordering> {
    Ok(parse_version(a)?.cmp(&parse_version(b)?))
}

/// Whether `candidate` is strictly newer than `current`.
pub fn is_newer(candidate: &str, current: &str) -> Result<bool> {
    Ok(compare_versions(candidate, current)? == Ordering::Greater)
}
