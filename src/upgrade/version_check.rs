use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

use crate::core::{Result, UpgradeError};
use crate::upgrade::release::UpdateStatus;
use crate::utils::platform::data_dir;

/// Outcome of the most recent release check.
///
/// Advisory only: nothing in the upgrade flow reads it back to make
/// decisions. It lets `upgrade --check-only` and other tooling report when
/// the last check ran and what it found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRecord {
    pub checked_at: DateTime<Utc>,
    pub current_version: String,
    pub latest_version: String,
    pub update_available: bool,
}

impl CheckRecord {
    pub fn from_status(status: &UpdateStatus) -> Self {
        Self {
            checked_at: Utc::now(),
            current_version: status.current_version.clone(),
            latest_version: status.latest_version.clone(),
            update_available: status.update_available,
        }
    }
}

/// Persistence for [`CheckRecord`].
pub trait CheckStore: Send + Sync {
    fn save(&self, record: &CheckRecord) -> impl Future<Output = Result<()>> + Send;
}

/// Stores the record as JSON in the data directory.
#[derive(Debug, Clone)]
pub struct FileCheckStore {
    path: PathBuf,
}

impl FileCheckStore {
    const FILE_NAME: &'static str = "last-update-check.json";

    pub fn new() -> Result<Self> {
        Ok(Self::in_dir(data_dir()?))
    }

    pub fn in_dir(dir: PathBuf) -> Self {
        Self {
            path: dir.join(Self::FILE_NAME),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl CheckStore for FileCheckStore {
    async fn save(&self, record: &CheckRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| UpgradeError::io("create data directory", parent, e))?;
        }

        let content = serde_json::to_string_pretty(record).map_err(|e| UpgradeError::Config {
            message: format!("failed to serialize check record: {e}"),
        })?;
        fs::write(&self.path, content)
            .await
            .map_err(|e| UpgradeError::io("write check record", &self.path, e))?;

        debug!("Saved check record to {}", self.path.display());
        Ok(())
    }
}
