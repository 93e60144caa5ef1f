//! Global constants used throughout the cloudsqlctl codebase.
//!
//! Timeouts, retry parameters and well-known file names that are shared
//! between the transport, the swap executor and the supervisor live here so
//! the numbers are discoverable in one place.

use std::time::Duration;

/// Per-request timeout for registry and download requests (60 seconds).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Number of retries after the first attempt for transient HTTP failures.
///
/// A request is therefore attempted at most `MAX_RETRIES + 1` times.
pub const MAX_RETRIES: usize = 2;

/// Base delay for the linear retry backoff (`base * attempt`).
pub const RETRY_BASE_DELAY_MS: u64 = 1000;

/// HTTP statuses that are considered transient and eligible for retry.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Name of the checksum manifest published with every release.
pub const CHECKSUM_MANIFEST_NAME: &str = "SHA256SUMS.txt";

/// Suffix for in-flight downloads. A file with this suffix is never trusted.
pub const DOWNLOAD_SUFFIX: &str = "download";

/// Suffix for the backup kept next to a swapped executable.
pub const BACKUP_SUFFIX: &str = "bak";

/// Suffix for the staged replacement binary placed next to the target.
pub const STAGED_SUFFIX: &str = "new";

/// Suffix for the swap request descriptor read by the supervisor.
pub const SWAP_REQUEST_SUFFIX: &str = "swap.json";

/// Suffix for the log file the detached supervisor writes to.
pub const SWAP_LOG_SUFFIX: &str = "swap.log";

/// Current version of the swap request descriptor format.
pub const SWAP_REQUEST_VERSION: u32 = 1;

/// File name of the cross-invocation upgrade lock.
pub const UPGRADE_LOCK_NAME: &str = ".upgrade.lock";

/// How long an upgrade waits for another in-flight upgrade (10 seconds).
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the supervisor waits for the parent process to exit (5 minutes).
pub const DEFAULT_SUPERVISOR_WAIT: Duration = Duration::from_secs(300);

/// How long the supervisor waits for the relaunched binary to report its version (30 seconds).
pub const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval used while waiting for a process to exit.
pub const PROCESS_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Maximum backoff delay for lock acquisition polling (500ms).
pub const MAX_BACKOFF_DELAY_MS: u64 = 500;

/// Starting delay for lock acquisition polling (10ms).
pub const STARTING_BACKOFF_DELAY_MS: u64 = 10;

/// Inno Setup flags used for unattended installer runs.
pub const SILENT_INSTALLER_ARGS: [&str; 3] = ["/VERYSILENT", "/SUPPRESSMSGBOXES", "/NORESTART"];

/// Environment variable carrying the installer path into the elevated context.
pub const INSTALLER_PATH_ENV: &str = "CLOUDSQLCTL_INSTALLER_PATH";

/// Environment variable carrying the installer arguments into the elevated context.
pub const INSTALLER_ARGS_ENV: &str = "CLOUDSQLCTL_INSTALLER_ARGS";

/// Windows `ERROR_CANCELLED`, returned when the user declines a UAC prompt.
pub const ERROR_CANCELLED: i32 = 1223;
