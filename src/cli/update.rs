//! Install or update the Cloud SQL Proxy binary.
//!
//! ```bash
//! cloudsqlctl update                       # Latest release to the default path
//! cloudsqlctl update --version v2.14.0     # Pin a release
//! cloudsqlctl update --path ~/bin/cloud-sql-proxy --json
//! ```

use crate::config::GlobalConfig;
use crate::proxy::ProxyUpdater;
use crate::upgrade::transport::{RetryPolicy, RetryingTransport};
use crate::utils::platform::expand_path;
use crate::utils::progress::DownloadProgress;
use anyhow::Result;
use clap::Args;
use colored::Colorize;

/// Command to install the Cloud SQL Proxy.
#[derive(Args, Debug)]
pub struct UpdateCommand {
    /// Proxy release tag (default: configured version, else latest)
    #[arg(long, value_name = "TAG")]
    pub version: Option<String>,

    /// Install location
    #[arg(long, value_name = "PATH")]
    pub path: Option<String>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

impl UpdateCommand {
    pub async fn execute(self, config: &GlobalConfig, show_progress: bool) -> Result<()> {
        let transport = RetryingTransport::new(RetryPolicy::default(), super::github_token())?;
        let updater = ProxyUpdater::new(&transport, &config.proxy);

        let target = match &self.path {
            Some(path) => expand_path(path)?,
            None => config.proxy.resolved_install_path()?,
        };

        let version = match self.version.or_else(|| config.proxy.version.clone()) {
            Some(version) => version,
            None => {
                if !self.json {
                    println!("{}", "Checking for the latest Cloud SQL Proxy...".cyan());
                }
                updater.latest_version().await?
            }
        };

        let progress = if show_progress {
            DownloadProgress::new(format!("Downloading Cloud SQL Proxy {version}"))
        } else {
            DownloadProgress::hidden()
        };
        let installed = updater.install(&version, &target, &progress).await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&installed)?);
        } else {
            println!(
                "{}",
                format!("Cloud SQL Proxy {} installed at {}", installed.version, installed.path.display())
                    .green()
            );
        }
        Ok(())
    }
}
