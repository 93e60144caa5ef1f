//! Self-update functionality for cloudsqlctl.
//!
//! This module lets cloudsqlctl upgrade itself from its GitHub releases. Every
//! downloaded binary is checked against the release's published SHA-256
//! manifest before it can reach an install location, and a running
//! executable is never rewritten in place.
//!
//! # Architecture Overview
//!
//! ## Core Components
//!
//! - **[`release::ReleaseResolver`]**: resolves the latest stable release,
//!   the latest prerelease, or an explicit tag
//! - **[`asset::select_asset`]**: picks the installer or the bare executable
//!   based on how cloudsqlctl was installed
//! - **[`verification::ChecksumVerifier`]**: fetches `SHA256SUMS.txt` and
//!   hashes downloads in constant memory
//! - **[`transport::RetryingTransport`]**: HTTP with bounded linear-backoff
//!   retries and rate-limit warnings
//! - **[`swap::SwapExecutor`]**: download, verify and apply as an explicit
//!   state machine
//! - **[`supervisor::run_swap`]**: the detached process that swaps a portable
//!   binary after cloudsqlctl exits
//! - **[`orchestrator::UpgradeOrchestrator`]**: sequences all of the above
//!   and tags failures with the stage that produced them
//!
//! ## Update Process Flow
//!
//! ```text
//! 1. Resolve
//!    └── GET releases/latest | releases | releases/tags/{tag}
//!
//! 2. Select asset
//!    └── installer package or bare executable, by install context
//!
//! 3. Fetch manifest
//!    └── SHA256SUMS.txt; a missing entry aborts here by default
//!
//! 4. Download (under the upgrade lock)
//!    └── stream to <dir>/<asset>.download
//!
//! 5. Verify
//!    ├── match: rename to <dir>/<asset>
//!    └── mismatch: delete, fail
//!
//! 6. Apply
//!    ├── installer: run (elevated if needed) and wait
//!    └── portable: stage <target>.new, start supervisor, exit
//! ```
//!
//! # Safety Mechanisms
//!
//! - **Verified Downloads**: the type-state split between
//!   [`swap::DownloadedArtifact`] and [`swap::VerifiedArtifact`] means only a
//!   verified file can be applied
//! - **No in-place writes**: portable swaps are renames in the target's own
//!   directory, performed after the old process has exited
//! - **Backups**: the previous binary is kept as `<target>.bak`
//! - **Mutual exclusion**: concurrent upgrades serialize on
//!   [`lock::UpgradeLock`]
//!
//! # Usage Patterns
//!
//! ```bash
//! cloudsqlctl upgrade --check-only        # Report without downloading
//! cloudsqlctl upgrade                     # Upgrade to the latest stable release
//! cloudsqlctl upgrade --channel beta      # Latest prerelease
//! cloudsqlctl upgrade --version 0.5.0 --force
//! cloudsqlctl upgrade --no-install --dir ./downloads
//! ```
//!
//! # Configuration
//!
//! Upgrade behavior can be configured via the global config file
//! (see [`config::UpgradeConfig`]):
//!
//! ```toml
//! [upgrade]
//! missing_checksum = "abort"   # or "warn"
//! channel = "stable"           # or "beta"
//! lock_timeout_secs = 10
//! ```

pub mod asset;
pub mod backup;
pub mod config;
pub mod launcher;
pub mod lock;
pub mod orchestrator;
pub mod release;
pub mod supervisor;
pub mod swap;
pub mod transport;
pub mod verification;
pub mod version_check;

pub use asset::{AssetMode, InstallContext};
pub use launcher::{Launcher, NativeLauncher};
pub use orchestrator::{UpgradeOptions, UpgradeOrchestrator, UpgradeOutcome, UpgradeReport};
pub use release::{ReleaseInfo, ReleaseResolver, ReleaseSelector, UpdateStatus};
pub use transport::{RetryPolicy, RetryingTransport};
pub use version_check::{CheckStore, FileCheckStore};
