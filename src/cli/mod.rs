//! Command-line interface for cloudsqlctl's update commands.
//!
//! # Available Commands
//!
//! - `upgrade` - Update cloudsqlctl itself from its GitHub releases
//! - `update` - Install or update the Cloud SQL Proxy binary
//! - `apply-swap` - (hidden) Finish a portable self-update after the parent exits
//!
//! # Global Options
//!
//! - `--verbose` / `-v`: Debug logging
//! - `--quiet` / `-q`: Errors only
//! - `--config` / `-c`: Path to the configuration file
//! - `--no-progress`: Disable progress bars
//!
//! Logs go to stderr. Commands that accept `--json` print exactly one JSON
//! object to stdout, including on failure.

mod apply_swap;
mod update;
mod upgrade;


use crate::config::GlobalConfig;
use crate::core::{StageFailure, UpgradeError};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Environment variables checked, in order, for a GitHub API token.
pub const TOKEN_ENV_VARS: [&str; 2] = ["CLOUDSQLCTL_GITHUB_TOKEN", "GITHUB_TOKEN"];

/// Main CLI structure for cloudsqlctl.
#[derive(Parser, Debug)]
#[command(
    name = "cloudsqlctl",
    about = "Manage the Cloud SQL Proxy and keep cloudsqlctl up to date",
    version,
    author
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Disable progress bars
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upgrade cloudsqlctl to a newer release
    Upgrade(upgrade::UpgradeCommand),

    /// Install or update the Cloud SQL Proxy
    Update(update::UpdateCommand),

    /// Swap a staged binary into place once its parent exits
    #[command(hide = true)]
    ApplySwap(apply_swap::ApplySwapCommand),
}

impl Cli {
    /// Whether the command prints machine-readable output.
    #[must_use]
    pub const fn json_output(&self) -> bool {
        match &self.command {
            Commands::Upgrade(cmd) => cmd.json,
            Commands::Update(cmd) => cmd.json,
            Commands::ApplySwap(_) => false,
        }
    }

    /// Log level used when `RUST_LOG` is not set.
    #[must_use]
    pub const fn default_log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else if self.json_output() {
            "warn"
        } else {
            "info"
        }
    }

    fn show_progress(&self) -> bool {
        !(self.quiet || self.no_progress || self.json_output())
    }

    pub async fn execute(self) -> Result<()> {
        let show_progress = self.show_progress();
        let config = GlobalConfig::load_with_optional(self.config.clone()).await?;

        match self.command {
            Commands::Upgrade(cmd) => cmd.execute(&config, show_progress).await,
            Commands::Update(cmd) => cmd.execute(&config, show_progress).await,
            Commands::ApplySwap(cmd) => cmd.execute().await,
        }
    }
}

/// GitHub token from the environment, if any.
pub fn github_token() -> Option<String> {
    TOKEN_ENV_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

/// The single JSON object printed for a failed `--json` command.
#[must_use]
pub fn json_error(error: &anyhow::Error) -> serde_json::Value {
    if let Some(failure) = error.downcast_ref::<StageFailure>() {
        return failure.to_json();
    }

    let kind = error.downcast_ref::<UpgradeError>().map_or("Error", UpgradeError::kind);
    serde_json::json!({
        "error": format!("{error:#}"),
        "kind": kind,
        "stage": serde_json::Value::Null,
    })
}
