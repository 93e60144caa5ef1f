//! Backoff schedules for retry operations.

use crate::constants::{MAX_BACKOFF_DELAY_MS, STARTING_BACKOFF_DELAY_MS};
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;

/// Linear backoff schedule: `base * 1`, `base * 2`, ... for `retries` retries.
///
/// The schedule is finite, so a [`tokio_retry::RetryIf`] driven by it makes at
/// most `retries + 1` attempts.
///
/// # Examples
///
/// ```rust
/// use cloudsqlctl::utils::backoff::linear_backoff;
/// use std::time::Duration;
///
/// let delays: Vec<_> = linear_backoff(Duration::from_millis(1000), 2).collect();
/// assert_eq!(delays, vec![Duration::from_millis(1000), Duration::from_millis(2000)]);
/// ```
pub fn linear_backoff(base: Duration, retries: usize) -> impl Iterator<Item = Duration> + Clone {
    (1..=retries).map(move |attempt| base.saturating_mul(attempt as u32))
}

/// Polling schedule for lock acquisition: 10ms, 20ms, 40ms... capped at 500ms.
pub fn lock_poll_backoff() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(STARTING_BACKOFF_DELAY_MS / 2)
        .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS))
}
