//! Test utilities for cloudsqlctl
//!
//! Helpers shared by unit tests and the integration suite: logging setup,
//! release payload fixtures, and in-memory stand-ins for the process
//! launcher and the check-record store.
//!
//! # Example
//!
//! ```rust,no_run
//! use cloudsqlctl::test_utils::{RecordingLauncher, github_release_json};
//!
//! let launcher = RecordingLauncher::new();
//! let release = github_release_json("v1.0.0", &[("cloudsqlctl.exe", "http://127.0.0.1/a")]);
//! assert_eq!(release["tag_name"], "v1.0.0");
//! assert!(launcher.calls().is_empty());
//! ```

use crate::core::{Result, UpgradeError};
use crate::upgrade::launcher::Launcher;
use crate::upgrade::version_check::{CheckRecord, CheckStore};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has any effect. Uses `level` if given, otherwise
/// `RUST_LOG`; with neither, logging stays off.
///
/// ```bash
/// RUST_LOG=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// A GitHub release object as returned by the releases API.
pub fn github_release_json(tag: &str, assets: &[(&str, &str)]) -> serde_json::Value {
    serde_json::json!({
        "tag_name": tag,
        "name": tag,
        "body": format!("Release {tag}"),
        "draft": false,
        "prerelease": tag.contains('-'),
        "assets": assets
            .iter()
            .map(|(name, url)| serde_json::json!({
                "name": name,
                "browser_download_url": url,
            }))
            .collect::<Vec<_>>(),
    })
}

/// One call observed by [`RecordingLauncher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchCall {
    Installer {
        path: PathBuf,
        args: Vec<String>,
        elevate: bool,
    },
    Detached {
        program: PathBuf,
        args: Vec<OsString>,
        log_path: PathBuf,
    },
}

/// How a fake installer run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallerBehavior {
    #[default]
    Succeed,
    DenyElevation,
    ExitWith(i32),
}

/// Launcher that records calls instead of starting processes.
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    elevated: bool,
    installer: InstallerBehavior,
    calls: Mutex<Vec<LaunchCall>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn elevated(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }

    #[must_use]
    pub fn installer(mut self, behavior: InstallerBehavior) -> Self {
        self.installer = behavior;
        self
    }

    pub fn calls(&self) -> Vec<LaunchCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: LaunchCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl Launcher for RecordingLauncher {
    fn is_elevated(&self) -> bool {
        self.elevated
    }

    async fn run_installer(&self, installer: &Path, args: &[String], elevate: bool) -> Result<()> {
        self.record(LaunchCall::Installer {
            path: installer.to_path_buf(),
            args: args.to_vec(),
            elevate,
        });
        match self.installer {
            InstallerBehavior::Succeed => Ok(()),
            InstallerBehavior::DenyElevation => Err(UpgradeError::ElevationDenied {
                operation: "run installer".to_string(),
            }),
            InstallerBehavior::ExitWith(code) => Err(UpgradeError::SwapFailed {
                reason: format!("installer exited with code {code}"),
            }),
        }
    }

    fn spawn_detached(&self, program: &Path, args: &[OsString], log_path: &Path) -> Result<u32> {
        self.record(LaunchCall::Detached {
            program: program.to_path_buf(),
            args: args.to_vec(),
            log_path: log_path.to_path_buf(),
        });
        Ok(4242)
    }
}

/// In-memory [`CheckStore`].
#[derive(Debug, Default)]
pub struct MemoryCheckStore {
    record: Mutex<Option<CheckRecord>>,
}

impl MemoryCheckStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) -> Option<CheckRecord> {
        self.record.lock().ok().and_then(|r| r.clone())
    }
}

impl CheckStore for MemoryCheckStore {
    async fn save(&self, record: &CheckRecord) -> Result<()> {
        if let Ok(mut slot) = self.record.lock() {
            *slot = Some(record.clone());
        }
        Ok(())
    }
}
