//! # swprobe Browser
//!
//! The embedded browser as an opaque capability. Dynamic detection only
//! needs a handful of operations from it:
//!
//! ```text
//! BrowserLauncher::launch ──► BrowserSession
//!                                ├── open_page ──► PageSession
//!                                │                   ├── set_extra_headers
//!                                │                   ├── navigate / reload
//!                                │                   ├── evaluate
//!                                │                   └── close
//!                                ├── wait_for_service_worker
//!                                └── close
//! ```
//!
//! Sessions are handed out as `Arc<dyn ...>` so callers can move them into
//! watchdog tasks. The `chromium` feature provides a DevTools protocol
//! backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

pub use swprobe_core::BrowserOptions;

#[cfg(feature = "chromium")]
pub mod chromium;

#[cfg(feature = "chromium")]
pub use chromium::ChromiumLauncher;

/// Message fragment the browser reports when a page's renderer dies mid-load.
pub const TARGET_CRASHED_MARKER: &str = "Inspector.targetCrashed";

// ==================== Errors ====================

/// Errors that can occur while driving the browser.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrowserError {
    #[error("Browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("Page failed to process Inspector.targetCrashed: {0}")]
    TargetCrashed(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Browser operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl BrowserError {
    /// The renderer crashed while loading; navigation is worth one retry.
    pub fn is_target_crashed(&self) -> bool {
        match self {
            BrowserError::TargetCrashed(_) => true,
            BrowserError::Navigation(msg) | BrowserError::Protocol(msg) => {
                msg.contains(TARGET_CRASHED_MARKER)
            }
            _ => false,
        }
    }

    /// A time budget ran out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BrowserError::Timeout(_))
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            BrowserError::LaunchFailed(_) => "launch_failed",
            BrowserError::TargetCrashed(_) => "target_crashed",
            BrowserError::Navigation(_) => "navigation",
            BrowserError::Timeout(_) => "timeout",
            BrowserError::Evaluation(_) => "evaluation",
            BrowserError::Protocol(_) => "protocol",
        }
    }
}

/// Result type alias for browser operations.
pub type Result<T> = std::result::Result<T, BrowserError>;

// ==================== Types ====================

/// A service worker execution context announced by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTarget {
    /// Script URL exactly as the browser reported it.
    pub url: String,
    /// Browser-side handle of the worker context.
    pub target_id: String,
}

/// Main-frame response to a navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationResponse {
    pub status: u16,
    pub status_text: String,
}

impl NavigationResponse {
    /// Check if the navigation was successful (2xx).
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ==================== Capability ====================

/// Starts browser instances.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launch a fresh browser. Failure here means the host can't run a
    /// browser at all.
    async fn launch(&self, options: &BrowserOptions) -> Result<Arc<dyn BrowserSession>>;
}

/// One running browser instance.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Open a blank page.
    async fn open_page(&self) -> Result<Arc<dyn PageSession>>;

    /// Wait until the browser starts a service worker context.
    ///
    /// Returns [`BrowserError::Timeout`] if none appears within `timeout`.
    async fn wait_for_service_worker(&self, timeout: Duration) -> Result<WorkerTarget>;

    /// Shut the browser down.
    async fn close(&self) -> Result<()>;
}

/// One page (tab) in a browser.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Headers sent with every request the page makes.
    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> Result<()>;

    /// Navigate and wait for the load event.
    async fn navigate(&self, url: &Url, timeout: Duration) -> Result<NavigationResponse>;

    /// Evaluate an expression, awaiting it if it is a promise.
    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value>;

    /// Reload and wait for the load event.
    async fn reload(&self, timeout: Duration) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
