//! Global configuration for cloudsqlctl.
//!
//! Settings live in a single TOML file, by default
//! `<config dir>/cloudsqlctl/config.toml` (`~/.config/cloudsqlctl/config.toml`
//! on Linux, `%APPDATA%\cloudsqlctl\config.toml` on Windows). The location can
//! be overridden with `--config` or `CLOUDSQLCTL_CONFIG_PATH`.
//!
//! A missing file is not an error; every setting has a default.
//!
//! ```toml
//! [upgrade]
//! missing_checksum = "abort"
//! channel = "stable"
//!
//! [proxy]
//! install_path = "~/.local/bin/cloud-sql-proxy"
//! ```

mod global;

pub use global::{CONFIG_PATH_ENV, GlobalConfig};
