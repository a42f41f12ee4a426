//! # swprobe Common
//!
//! Common utilities shared by the swprobe crates.
//!
//! ## Features
//!
//! - Utility error type for timeouts, cancellation and failed tasks
//! - Logging configuration and setup
//! - Timeout, watchdog and retry helpers
//! - [`ResultRacer`], a first-matching-result race over concurrent operations

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod race;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use race::{NoMatchReason, RaceOutcome, ResultRacer};
pub use retry::{retry_when, watchdog, with_timeout, RetryConfig};

/// Error type for the shared async utilities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Cancelled operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// A spawned task panicked or was aborted.
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl CommonError {
    /// Whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CommonError::Timeout(_))
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            CommonError::Timeout(_) => "timeout",
            CommonError::Cancelled => "cancelled",
            CommonError::TaskFailed(_) => "task_failed",
        }
    }
}

/// Result type alias for the shared utilities.
pub type Result<T> = std::result::Result<T, CommonError>;
