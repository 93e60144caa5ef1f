//! cloudsqlctl CLI entry point
//!
//! Parses arguments, sets up logging on stderr and runs the command. Failures
//! exit with status 1; in `--json` mode the error is printed to stdout as a
//! single JSON object instead of the human-readable report.

use anyhow::Result;
use clap::Parser;
use cloudsqlctl::cli;
use cloudsqlctl::core::user_friendly_error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Set up colored output for Windows
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.default_log_level())),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let json = cli.json_output();
    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            if json {
                println!("{}", cli::json_error(&e));
            } else {
                user_friendly_error(e).display();
            }
            std::process::exit(1);
        }
    }
}
