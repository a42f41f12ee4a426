//! Retry, timeout and watchdog utilities.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::CommonError;

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (1 = no retries).
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryConfig {
    /// Create a config for no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// A single immediate retry.
    pub fn once() -> Self {
        Self {
            max_attempts: 2,
            delay: Duration::ZERO,
        }
    }
}

/// Retry a fallible async operation while `should_retry` accepts the error.
///
/// Errors rejected by `should_retry` are returned immediately.
pub async fn retry_when<T, E, F, Fut, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(e) if attempt < max_attempts && should_retry(&e) => {
                warn!(attempt, max_attempts, error = %e, "Retryable failure");
                if !config.delay.is_zero() {
                    sleep(config.delay).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run an operation with a cooperative timeout.
pub async fn with_timeout<T, F, Fut>(timeout: Duration, operation: F) -> Result<T, CommonError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, operation())
        .await
        .map_err(|_| CommonError::Timeout(timeout))
}

/// Run an operation on its own task and stop waiting for it after `limit`.
///
/// The timer is polled by the caller's task, not by the operation, so an
/// operation that stops yielding (or blocks its worker thread) cannot delay
/// the timeout on a multi-threaded runtime. On expiry the task is aborted and
/// left to unwind whenever it next yields.
pub async fn watchdog<T, Fut>(limit: Duration, operation: Fut) -> Result<T, CommonError>
where
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::spawn(operation);

    tokio::select! {
        joined = &mut handle => joined.map_err(|e| CommonError::TaskFailed(e.to_string())),
        _ = sleep(limit) => {
            handle.abort();
            warn!(?limit, "Watchdog expired, abandoning operation");
            Err(CommonError::Timeout(limit))
        }
    }
}
