//! Download progress indicators.
//!
//! A thin wrapper over `indicatif` that is hidden when output must stay
//! machine-readable (`--json`), when `--quiet` is set, or when
//! `CLOUDSQLCTL_NO_PROGRESS` is present in the environment.

use indicatif::{ProgressBar as IndicatifBar, ProgressStyle as IndicatifStyle};

/// Environment variable that disables every progress indicator.
pub const NO_PROGRESS_ENV: &str = "CLOUDSQLCTL_NO_PROGRESS";

fn is_progress_disabled() -> bool {
    std::env::var_os(NO_PROGRESS_ENV).is_some()
}

/// Byte-count progress bar for a single download.
#[derive(Clone)]
pub struct DownloadProgress {
    inner: IndicatifBar,
}

impl DownloadProgress {
    /// Creates a visible bar unless progress output is disabled.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        if is_progress_disabled() {
            return Self::hidden();
        }

        let bar = IndicatifBar::new(0);
        let style = IndicatifStyle::with_template(
            "{msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
        )
        .unwrap_or_else(|_| IndicatifStyle::default_bar())
        .progress_chars("=> ");
        bar.set_style(style);
        bar.set_message(message.into());
        Self {
            inner: bar,
        }
    }

    /// A bar that never draws anything.
    #[must_use]
    pub fn hidden() -> Self {
        Self {
            inner: IndicatifBar::hidden(),
        }
    }

    pub fn set_length(&self, len: u64) {
        self.inner.set_length(len);
    }

    pub fn inc(&self, delta: u64) {
        self.inner.inc(delta);
    }

    /// Resets the position, used when a download is retried from scratch.
    pub fn reset(&self) {
        self.inner.set_position(0);
    }

    pub fn finish(&self) {
        self.inner.finish_and_clear();
    }

    #[must_use]
    pub fn position(&self) -> u64 {
        self.inner.position()
    }
}
