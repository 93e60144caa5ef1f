//! Cross-cutting utilities: retry schedules, platform paths and progress output.

pub mod backoff;
pub mod platform;
pub mod progress;

pub use platform::{expand_path, is_package_managed, is_system_scope, is_windows, sibling_path};
pub use progress::DownloadProgress;
