use crate::constants::DEFAULT_SUPERVISOR_WAIT;
use crate::upgrade::supervisor::run_swap;
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Supervisor entry point started by a portable upgrade.
#[derive(Args, Debug)]
pub struct ApplySwapCommand {
    /// Swap request descriptor
    #[arg(long, value_name = "FILE")]
    pub request: PathBuf,

    /// Seconds to wait for the requesting process to exit
    #[arg(long, default_value_t = DEFAULT_SUPERVISOR_WAIT.as_secs())]
    pub wait_secs: u64,
}

impl ApplySwapCommand {
    pub async fn execute(self) -> Result<()> {
        let report = run_swap(&self.request, Duration::from_secs(self.wait_secs)).await?;
        info!(
            "Swap complete: {}{}",
            report.target.display(),
            report.launch_output.map(|v| format!(" ({v})")).unwrap_or_default()
        );
        Ok(())
    }
}
