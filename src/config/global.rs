use crate::proxy::ProxyConfig;
use crate::upgrade::config::UpgradeConfig;
use crate::utils::platform::default_config_path;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "CLOUDSQLCTL_CONFIG_PATH";

/// Contents of the global configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Self-update settings (`[upgrade]`).
    #[serde(default)]
    pub upgrade: UpgradeConfig,

    /// Cloud SQL Proxy installer settings (`[proxy]`).
    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl GlobalConfig {
    /// Loads from the default location, or returns defaults if there is no file.
    pub async fn load() -> Result<Self> {
        Self::load_with_optional(None).await
    }

    /// Loads from `path` when given, otherwise from [`Self::default_path`].
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file is not.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from(&path).await;
        }

        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path).await
        } else {
            debug!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// `CLOUDSQLCTL_CONFIG_PATH` if set, else the platform config directory.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.trim().is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        Ok(default_config_path()?)
    }
}
