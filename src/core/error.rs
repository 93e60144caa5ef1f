//! Error handling for cloudsqlctl
//!
//! The error system follows two rules:
//! 1. **Strongly-typed errors** so callers (and tests) can match on the exact
//!    failure of each update stage
//! 2. **User-friendly messages** with actionable suggestions for CLI users
//!
//! # Architecture
//!
//! - [`UpgradeError`] - every failure the update subsystem can produce
//! - [`Stage`] / [`StageFailure`] - the orchestrator's stage tag around an error
//! - [`ErrorContext`] - wrapper that adds suggestions and details for display
//!
//! Use [`user_friendly_error`] to turn any `anyhow::Error` bubbling out of the
//! CLI into an [`ErrorContext`].

use colored::Colorize;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used by the library side of the crate.
pub type Result<T, E = UpgradeError> = std::result::Result<T, E>;

/// Failure observed on a single transport attempt.
#[derive(Error, Debug)]
pub enum FetchFailure {
    /// No response was received (DNS, connect, TLS, timeout, broken body).
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The server stopped sending data for longer than the request timeout.
    #[error("no data received for {}s", .0.as_secs())]
    Stalled(std::time::Duration),

    /// The server answered with a status the caller could not use.
    #[error("HTTP {status}")]
    Status {
        status: u16,
        rate_limit: Option<String>,
    },
}

impl FetchFailure {
    /// Whether another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Stalled(_) => true,
            Self::Status {
                status,
                ..
            } => crate::constants::RETRYABLE_STATUSES.contains(status),
        }
    }
}

#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("Release not found: {what}")]
    NotFound {
        what: String,
    },

    #[error("No release asset matches pattern '{pattern}' for {context} install")]
    AssetNotFound {
        pattern: String,
        context: String,
    },

    #[error("Checksum manifest '{manifest}' is not published with release {tag}")]
    ManifestNotFound {
        manifest: String,
        tag: String,
    },

    #[error("Checksum manifest '{manifest}' has no entry for '{asset}'")]
    ChecksumUnavailable {
        asset: String,
        manifest: String,
    },

    #[error("Checksum mismatch for '{name}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("I/O error during {operation} on {}", .path.display())]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Request to {url} failed with HTTP {status}")]
    HttpStatus {
        url: String,
        status: u16,
    },

    #[error("Request to {url} failed after {attempts} attempt(s): {source}")]
    Transport {
        url: String,
        attempts: usize,
        #[source]
        source: FetchFailure,
    },

    #[error("Invalid response from {url}: {reason}")]
    InvalidResponse {
        url: String,
        reason: String,
    },

    #[error("Elevated privileges are required to {operation}")]
    ElevationRequired {
        operation: String,
    },

    #[error("Privilege elevation was denied while trying to {operation}")]
    ElevationDenied {
        operation: String,
    },

    #[error("Failed to apply update: {reason}")]
    SwapFailed {
        reason: String,
    },

    #[error("Invalid version '{version}': {reason}")]
    InvalidVersion {
        version: String,
        reason: String,
    },

    #[error("Invalid asset pattern '{pattern}': {reason}")]
    InvalidPattern {
        pattern: String,
        reason: String,
    },

    #[error("Another upgrade is in progress (lock held at {})", .path.display())]
    UpgradeInProgress {
        path: PathBuf,
    },

    #[error("Invalid swap state transition: {from} -> {to}")]
    InvalidTransition {
        from: String,
        to: String,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
    },
}

impl UpgradeError {
    /// Shorthand for wrapping an [`std::io::Error`] with the failing operation.
    pub fn io(operation: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    /// Stable, machine-readable name of the error variant.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound {
                ..
            } => "NotFound",
            Self::AssetNotFound {
                ..
            } => "AssetNotFound",
            Self::ManifestNotFound {
                ..
            } => "ManifestNotFound",
            Self::ChecksumUnavailable {
                ..
            } => "ChecksumUnavailable",
            Self::ChecksumMismatch {
                ..
            } => "ChecksumMismatch",
            Self::Io {
                ..
            } => "IOError",
            Self::HttpStatus {
                ..
            } => "HttpStatus",
            Self::Transport {
                ..
            } => "TransportError",
            Self::InvalidResponse {
                ..
            } => "InvalidResponse",
            Self::ElevationRequired {
                ..
            } => "ElevationRequired",
            Self::ElevationDenied {
                ..
            } => "ElevationDenied",
            Self::SwapFailed {
                ..
            } => "SwapFailed",
            Self::InvalidVersion {
                ..
            } => "InvalidVersion",
            Self::InvalidPattern {
                ..
            } => "InvalidPattern",
            Self::UpgradeInProgress {
                ..
            } => "UpgradeInProgress",
            Self::InvalidTransition {
                ..
            } => "InvalidTransition",
            Self::Config {
                ..
            } => "ConfigError",
        }
    }
}

/// Orchestrator stage at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Resolve,
    SelectAsset,
    FetchManifest,
    Download,
    Verify,
    Apply,
}

impl Stage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::SelectAsset => "select-asset",
            Self::FetchManifest => "fetch-manifest",
            Self::Download => "download",
            Self::Verify => "verify",
            Self::Apply => "apply",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An [`UpgradeError`] tagged with the stage that produced it.
#[derive(Error, Debug)]
#[error("[{stage}] {error}")]
pub struct StageFailure {
    pub stage: Stage,
    #[source]
    pub error: UpgradeError,
}

impl StageFailure {
    #[must_use]
    pub const fn new(stage: Stage, error: UpgradeError) -> Self {
        Self {
            stage,
            error,
        }
    }

    /// Single JSON object emitted in machine-readable mode.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.error.to_string(),
            "kind": self.error.kind(),
            "stage": self.stage.as_str(),
        })
    }
}

/// Extension trait for tagging component results with a stage.
pub trait StageExt<T> {
    fn at_stage(self, stage: Stage) -> Result<T, StageFailure>;
}

impl<T> StageExt<T> for Result<T> {
    fn at_stage(self, stage: Stage) -> Result<T, StageFailure> {
        self.map_err(|error| StageFailure::new(stage, error))
    }
}

#[derive(Debug)]
pub struct ErrorContext {
    pub message: String,
    pub stage: Option<Stage>,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl ErrorContext {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stage: None,
            suggestion: None,
            details: None,
        }
    }

    #[must_use]
    pub const fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn display(&self) {
        match self.stage {
            Some(stage) => {
                eprintln!("{} [{}]: {}", "error".red().bold(), stage.as_str().bold(), self.message);
            }
            None => eprintln!("{}: {}", "error".red().bold(), self.message),
        }

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(stage) = self.stage {
            write!(f, "[{stage}] ")?;
        }
        write!(f, "{}", self.message)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(failure) = error.downcast_ref::<StageFailure>() {
        return create_error_context(&failure.error).with_stage(failure.stage);
    }

    if let Some(upgrade_error) = error.downcast_ref::<UpgradeError>() {
        return create_error_context(upgrade_error);
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        if io_error.kind() == std::io::ErrorKind::PermissionDenied {
            return ErrorContext::new(error.to_string()).with_suggestion(
                "Re-run from an elevated shell or check the ownership of the install directory",
            );
        }
    }

    // Generic error - include the full error chain for better diagnostics
    let mut message = error.to_string();
    let chain: Vec<String> =
        error.chain().skip(1).map(std::string::ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    ErrorContext::new(message)
}

fn create_error_context(error: &UpgradeError) -> ErrorContext {
    let ctx = ErrorContext::new(error.to_string());
    match error {
        UpgradeError::NotFound { .. } => ctx
            .with_suggestion("Check the tag name, or drop --version to install the latest stable release"),

        UpgradeError::AssetNotFound { context, .. } => ctx
            .with_suggestion("Pick the other asset type with --asset installer or --asset exe")
            .with_details(format!("The release does not publish a {context} build")),

        UpgradeError::ManifestNotFound { .. } | UpgradeError::ChecksumUnavailable { .. } => ctx
            .with_suggestion("Wait for the release to finish publishing, or set upgrade.missing_checksum = \"warn\" to accept unverified downloads")
            .with_details("Executables are only installed after their SHA-256 digest has been verified"),

        UpgradeError::ChecksumMismatch { .. } => ctx
            .with_suggestion("Retry the upgrade. If the mismatch persists, report it to the maintainers")
            .with_details("The downloaded file was deleted; nothing was installed"),

        UpgradeError::Transport { source, .. } => {
            let ctx = ctx.with_suggestion("Check your network connection and try again later");
            match source {
                FetchFailure::Status { rate_limit: Some(msg), .. } => ctx.with_details(msg.clone()),
                _ => ctx,
            }
        }

        UpgradeError::HttpStatus { status: 401 | 403, .. } => ctx
            .with_suggestion("Set CLOUDSQLCTL_GITHUB_TOKEN or GITHUB_TOKEN to authenticate registry requests"),

        UpgradeError::ElevationRequired { .. } => ctx
            .with_suggestion(match cfg!(windows) {
                true => "Re-run without --no-elevate, or from an Administrator prompt",
                false => "Re-run without --no-elevate, or with sudo",
            }),

        UpgradeError::ElevationDenied { .. } => ctx
            .with_suggestion("Accept the elevation prompt, or run the upgrade from an elevated shell"),

        UpgradeError::SwapFailed { .. } => ctx
            .with_details("A backup of the previous executable may remain next to it with a .bak suffix"),

        UpgradeError::UpgradeInProgress { .. } => ctx
            .with_suggestion("Wait for the other upgrade to finish, then try again"),

        _ => ctx,
    }
}
