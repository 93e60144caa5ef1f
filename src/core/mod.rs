//! Core types shared by every cloudsqlctl module.
//!
//! At the moment this is the error taxonomy: [`UpgradeError`] for the
//! library, [`StageFailure`] for orchestrator results and [`ErrorContext`] for
//! what the CLI prints.

pub mod error;

pub use error::{
    ErrorContext, FetchFailure, Result, Stage, StageExt, StageFailure, UpgradeError,
    user_friendly_error,
};
