//! Platform-specific helpers the updater consumes.
//!
//! Path discovery is intentionally shallow: the updater only needs to know
//! where its own state lives and whether an install location is owned by the
//! system (package manager, `Program Files`) or by the user.

use crate::core::{Result, UpgradeError};
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "cloudsqlctl";

/// Checks if the current platform is Windows.
#[must_use]
pub const fn is_windows() -> bool {
    cfg!(windows)
}

/// Per-user data directory (`%LOCALAPPDATA%\cloudsqlctl`, `~/.local/share/cloudsqlctl`).
pub fn data_dir() -> Result<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join(APP_DIR_NAME)).ok_or_else(|| {
        UpgradeError::Config {
            message: "could not determine the local data directory".to_string(),
        }
    })
}

/// Default configuration file location.
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join("config.toml")).ok_or_else(|| {
        UpgradeError::Config {
            message: "could not determine the configuration directory".to_string(),
        }
    })
}

/// Default directory for downloaded release assets.
pub fn default_download_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("downloads").join("updates"))
}

/// Expands `~` and environment variables in a user-supplied path.
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    shellexpand::full(raw).map(|expanded| PathBuf::from(expanded.as_ref())).map_err(|e| {
        UpgradeError::Config {
            message: format!("cannot expand path '{raw}': {e}"),
        }
    })
}

/// `<path>.<suffix>` in the same directory, e.g. `cloudsqlctl.exe.bak`.
#[must_use]
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Whether `path` lives in a system-owned location that needs elevation to modify.
///
/// On Windows this is `Program Files`, `Program Files (x86)` and `ProgramData`.
/// Elsewhere it is any location whose nearest existing directory the current
/// user cannot create files in.
#[must_use]
pub fn is_system_scope(path: &Path) -> bool {
    if is_windows() {
        let normalized = path.to_string_lossy().to_lowercase().replace('/', "\\");
        return normalized.contains("\\program files") || normalized.contains("\\programdata");
    }

    let dir = path
        .ancestors()
        .skip(1)
        .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
        .find(|p| p.is_dir());
    match dir {
        Some(dir) => !dir_is_writable(dir),
        None => true,
    }
}

fn dir_is_writable(dir: &Path) -> bool {
    tempfile::Builder::new().prefix(".cloudsqlctl-write-check").tempfile_in(dir).is_ok()
}

/// Whether `a` and `b` name the same file, resolving symlinks and `..`.
///
/// Either path may not exist yet; its parent directory is resolved instead.
#[must_use]
pub fn same_path(a: &Path, b: &Path) -> bool {
    resolve(a) == resolve(b)
}

fn resolve(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            parent.canonicalize().map(|dir| dir.join(name)).unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    }
}

/// Whether `path` looks like a package-manager install location.
///
/// This is narrower than [`is_system_scope`]: `/usr/local` and `/opt` hold
/// hand-installed binaries, so they are treated as portable.
#[must_use]
pub fn is_package_managed(path: &Path) -> bool {
    if is_windows() {
        let normalized = path.to_string_lossy().to_lowercase().replace('/', "\\");
        return normalized.contains("\\program files");
    }

    path.starts_with("/usr") && !path.starts_with("/usr/local")
}
