//! HTTP transport with bounded retries and rate-limit awareness.
//!
//! Every registry request and asset download goes through
//! [`RetryingTransport`]. A request is attempted at most
//! `max_retries + 1` times; between attempts the transport sleeps
//! `base_delay * attempt`. Only failures that may go away on their own are
//! retried: no response at all, or a status in
//! [`RETRYABLE_STATUSES`](crate::constants::RETRYABLE_STATUSES). Anything
//! else is returned on the first attempt.
//!
//! Downloads stream straight to disk in constant memory. A partially written
//! file is deleted before a retry and after a terminal failure, so the caller
//! never sees a truncated artifact.

use crate::constants::{MAX_RETRIES, REQUEST_TIMEOUT, RETRY_BASE_DELAY_MS};
use crate::core::{FetchFailure, Result, UpgradeError};
use crate::utils::backoff::linear_backoff;
use crate::utils::progress::DownloadProgress;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_retry::RetryIf;
use tracing::{debug, warn};

/// Retry and timeout parameters for [`RetryingTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: usize,
    /// Delay unit; the n-th retry waits `base_delay * n`.
    pub base_delay: Duration,
    /// Per-request timeout, and idle timeout while streaming a body.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            timeout: REQUEST_TIMEOUT,
        }
    }
}

/// Outcome of one failed attempt.
#[derive(Debug)]
enum AttemptError {
    /// Network or HTTP failure, possibly retryable.
    Fetch(FetchFailure),
    /// Local failure that no retry can fix.
    Fatal(UpgradeError),
}

impl From<FetchFailure> for AttemptError {
    fn from(failure: FetchFailure) -> Self {
        Self::Fetch(failure)
    }
}

/// HTTP client wrapper used for every registry and download request.
#[derive(Debug, Clone)]
pub struct RetryingTransport {
    client: reqwest::Client,
    policy: RetryPolicy,
    token: Option<String>,
}

impl RetryingTransport {
    /// Builds a transport. `token` is sent as a bearer credential on API
    /// requests only, never on asset downloads.
    pub fn new(policy: RetryPolicy, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("cloudsqlctl/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(policy.timeout)
            .build()
            .map_err(|e| UpgradeError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            policy,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// Fetches an API `url` and returns the body as text.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        self.fetch_text(url, true).await
    }

    /// Fetches a release asset or other non-API `url` as text. No token and
    /// no API `Accept` header are sent.
    pub async fn get_asset_text(&self, url: &str) -> Result<String> {
        self.fetch_text(url, false).await
    }

    async fn fetch_text(&self, url: &str, api: bool) -> Result<String> {
        self.with_retry(url, || async move {
            let response = self.send_once(url, api).await?;
            let body = tokio::time::timeout(self.policy.timeout, response.text())
                .await
                .map_err(|_| FetchFailure::Stalled(self.policy.timeout))?;
            body.map_err(|e| AttemptError::Fetch(FetchFailure::Network(e)))
        })
        .await
    }

    /// Fetches `url` and decodes the body as JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| UpgradeError::InvalidResponse {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Streams `url` into `dest`, creating the parent directory first.
    ///
    /// Returns the number of bytes written. On failure `dest` does not exist.
    pub async fn download_to_file(
        &self,
        url: &str,
        dest: &Path,
        progress: &DownloadProgress,
    ) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| UpgradeError::io("create download directory", parent, e))?;
        }

        let result = self
            .with_retry(url, || async move {
                let outcome = self.download_once(url, dest, progress).await;
                if outcome.is_err() {
                    remove_partial(dest).await;
                }
                outcome
            })
            .await;

        progress.finish();
        if result.is_err() {
            remove_partial(dest).await;
        }
        result
    }

    async fn download_once(
        &self,
        url: &str,
        dest: &Path,
        progress: &DownloadProgress,
    ) -> std::result::Result<u64, AttemptError> {
        let response = self.send_once(url, false).await?;

        progress.reset();
        if let Some(len) = response.content_length() {
            progress.set_length(len);
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| AttemptError::Fatal(UpgradeError::io("create download file", dest, e)))?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::time::timeout(self.policy.timeout, stream.next())
                .await
                .map_err(|_| FetchFailure::Stalled(self.policy.timeout))?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(FetchFailure::Network)?;
            file.write_all(&chunk)
                .await
                .map_err(|e| AttemptError::Fatal(UpgradeError::io("write download", dest, e)))?;
            written += chunk.len() as u64;
            progress.inc(chunk.len() as u64);
        }

        file.flush()
            .await
            .map_err(|e| AttemptError::Fatal(UpgradeError::io("flush download", dest, e)))?;
        file.sync_all()
            .await
            .map_err(|e| AttemptError::Fatal(UpgradeError::io("sync download", dest, e)))?;

        debug!("Downloaded {} bytes from {} to {}", written, url, dest.display());
        Ok(written)
    }

    /// One request. API requests carry the bearer token and a total timeout;
    /// downloads only bound the wait for response headers.
    async fn send_once(
        &self,
        url: &str,
        api: bool,
    ) -> std::result::Result<reqwest::Response, FetchFailure> {
        let mut request = self.client.get(url);
        if api {
            request = request
                .header(reqwest::header::ACCEPT, "application/vnd.github+json")
                .timeout(self.policy.timeout);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
        }

        let response = tokio::time::timeout(self.policy.timeout, request.send())
            .await
            .map_err(|_| FetchFailure::Stalled(self.policy.timeout))?
            .map_err(FetchFailure::Network)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        Err(FetchFailure::Status {
            status: status.as_u16(),
            rate_limit: rate_limit_message(status, response.headers()),
        })
    }

    async fn with_retry<T, F, Fut>(&self, url: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, AttemptError>>,
    {
        let attempts = AtomicUsize::new(0);
        let max_attempts = self.policy.max_retries + 1;

        let result = RetryIf::spawn(
            linear_backoff(self.policy.base_delay, self.policy.max_retries),
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("GET {} (attempt {}/{})", url, n, max_attempts);
                attempt()
            },
            |error: &AttemptError| match error {
                AttemptError::Fetch(failure) => {
                    if let FetchFailure::Status {
                        rate_limit: Some(message),
                        ..
                    } = failure
                    {
                        warn!("{}", message);
                    }
                    let retry = failure.is_retryable()
                        && attempts.load(Ordering::SeqCst) < max_attempts;
                    if retry {
                        warn!("Request to {} failed ({}), retrying...", url, failure);
                    }
                    retry
                }
                AttemptError::Fatal(_) => false,
            },
        )
        .await;

        result.map_err(|error| match error {
            AttemptError::Fatal(error) => error,
            AttemptError::Fetch(failure) if failure.is_retryable() => UpgradeError::Transport {
                url: url.to_string(),
                attempts: attempts.load(Ordering::SeqCst),
                source: failure,
            },
            AttemptError::Fetch(FetchFailure::Status {
                status,
                ..
            }) => UpgradeError::HttpStatus {
                url: url.to_string(),
                status,
            },
            AttemptError::Fetch(failure) => UpgradeError::Transport {
                url: url.to_string(),
                attempts: attempts.load(Ordering::SeqCst),
                source: failure,
            },
        })
    }
}

/// Human-readable rate-limit notice for an exhausted 429/403 response.
fn rate_limit_message(status: StatusCode, headers: &HeaderMap) -> Option<String> {
    if status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::FORBIDDEN {
        return None;
    }

    let remaining = headers.get("x-ratelimit-remaining")?.to_str().ok()?;
    if remaining.trim() != "0" {
        return None;
    }

    let reset = headers.get("x-ratelimit-reset")?.to_str().ok()?.trim().parse::<i64>().ok()?;
    let reset_at = chrono::DateTime::from_timestamp(reset, 0)?;
    Some(format!("GitHub API rate limit exceeded. Resets at {}.", reset_at.to_rfc3339()))
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial download {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial download {}: {}", path.display(), e),
    }
}
