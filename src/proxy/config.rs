use crate::core::Result;
use crate::utils::platform::{data_dir, expand_path, is_windows};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for the Cloud SQL Proxy installer (`[proxy]` table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// GitHub repository whose releases name the proxy versions.
    #[serde(default = "default_repo")]
    pub repo: String,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Bucket URL the binaries are served from.
    #[serde(default = "default_download_base_url")]
    pub download_base_url: String,

    /// Pinned version; `None` means latest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Install location; `None` means the platform default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_path: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            repo: default_repo(),
            api_base_url: default_api_base_url(),
            download_base_url: default_download_base_url(),
            version: None,
            install_path: None,
        }
    }
}

impl ProxyConfig {
    /// Configured install path, or `%ProgramData%\CloudSQLCTL\cloud_sql_proxy.exe`
    /// on Windows and `<data dir>/bin/cloud-sql-proxy` elsewhere.
    pub fn resolved_install_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.install_path {
            return expand_path(path);
        }

        if is_windows() {
            let program_data =
                std::env::var_os("ProgramData").map_or_else(|| PathBuf::from(r"C:\ProgramData"), PathBuf::from);
            return Ok(program_data.join("CloudSQLCTL").join("cloud_sql_proxy.exe"));
        }

        Ok(data_dir()?.join("bin").join("cloud-sql-proxy"))
    }
}

fn default_repo() -> String {
    "GoogleCloudPlatform/cloud-sql-proxy".to_string()
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_download_base_url() -> String {
    "https://storage.googleapis.com/cloud-sql-connectors/cloud-sql-proxy".to_string()
}
