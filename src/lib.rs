//! cloudsqlctl - Cloud SQL Proxy manager with a checksum-verified self-update
//!
//! This library backs the `cloudsqlctl` binary. It covers two update paths:
//!
//! - **Self-update** ([`upgrade`]): resolve a release of cloudsqlctl on GitHub,
//!   pick the installer or portable asset, verify it against the release's
//!   `SHA256SUMS.txt` and install it. Portable binaries cannot overwrite
//!   themselves while running, so the swap is handed to a detached supervisor
//!   process that waits for the parent to exit.
//! - **Proxy install** ([`proxy`]): download a Cloud SQL Proxy release and
//!   verify it against its published `.sha256` sidecar.
//!
//! # Modules
//!
//! - [`cli`] - Command-line parsing and command execution
//! - [`config`] - Global configuration file (`config.toml`)
//! - [`constants`] - Timeouts, retry limits and file-name suffixes
//! - [`core`] - Error taxonomy and user-facing error reports
//! - [`proxy`] - Cloud SQL Proxy installer
//! - [`upgrade`] - Self-update pipeline
//! - [`utils`] - Platform paths, retry schedules and progress bars
//!
//! # Configuration
//!
//! ```toml
//! [upgrade]
//! channel = "stable"
//! missing_checksum = "abort"
//!
//! [proxy]
//! version = "v2.14.0"
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod proxy;
pub mod upgrade;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
