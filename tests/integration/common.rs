//! Shared fixtures for the integration suite.

use cloudsqlctl::upgrade::config::UpgradeConfig;
use cloudsqlctl::upgrade::transport::{RetryPolicy, RetryingTransport};
use std::time::Duration;
use wiremock::MockServer;

pub const REPO: &str = "/repos/Kinin-Code-Offical/cloudsqlctl";

/// Upgrade settings pointing at `server`.
pub fn upgrade_config(server: &MockServer) -> UpgradeConfig {
    UpgradeConfig {
        api_base_url: server.uri(),
        lock_timeout_secs: 2,
        ..UpgradeConfig::default()
    }
}

/// Transport with short delays so retry tests stay fast.
pub fn fast_transport() -> RetryingTransport {
    RetryingTransport::new(
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
        },
        None,
    )
    .unwrap()
}
