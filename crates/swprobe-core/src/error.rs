//! Error types for swprobe detection

use thiserror::Error;

/// Result type alias for detection operations
pub type DetectResult<T> = Result<T, DetectError>;

/// Errors surfaced across the detection boundary.
///
/// Negative detections are not errors; they are a [`DetectionResult`] with
/// no worker URL. Only the variants below reach callers.
///
/// [`DetectionResult`]: crate::DetectionResult
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Resource acquisition failed: {0}")]
    ResourceAcquisition(String),

    #[error("No service worker found for {0}")]
    NoServiceWorker(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Timed out: {0}")]
    TimedOut(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DetectError {
    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new resource acquisition error
    pub fn resource_acquisition(msg: impl Into<String>) -> Self {
        Self::ResourceAcquisition(msg.into())
    }

    /// Create a new "no service worker" error for a URL
    pub fn no_service_worker(url: impl Into<String>) -> Self {
        Self::NoServiceWorker(url.into())
    }

    /// Create a new network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a new browser error
    pub fn browser(msg: impl Into<String>) -> Self {
        Self::Browser(msg.into())
    }

    /// Create a new timeout error
    pub fn timed_out(msg: impl Into<String>) -> Self {
        Self::TimedOut(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the caller sent something unusable (as opposed to the
    /// detector itself being unhealthy).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::NoServiceWorker(_))
    }

    /// Whether a time budget ran out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::ResourceAcquisition(_) => "resource_acquisition",
            Self::NoServiceWorker(_) => "no_service_worker",
            Self::Network(_) => "network",
            Self::Browser(_) => "browser",
            Self::TimedOut(_) => "timeout",
            Self::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for DetectError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers_and_categories() {
        let err = DetectError::invalid_input("URIs must not be local");
        assert_eq!(err.to_string(), "Invalid input: URIs must not be local");
        assert_eq!(err.category(), "invalid_input");
        assert!(err.is_client_error());

        let err = DetectError::resource_acquisition("no chrome");
        assert_eq!(err.category(), "resource_acquisition");
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_is_timeout() {
        let err = DetectError::timed_out("https://example.com/ after 5s");
        assert!(err.is_timeout());
        assert_eq!(err.category(), "timeout");
        assert!(!err.is_client_error());

        assert!(!DetectError::network("connection refused").is_timeout());
        assert!(!DetectError::network("request timed out after 5s").is_timeout());
        assert!(!DetectError::browser("Navigation Timeout exceeded").is_timeout());
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        assert_eq!(DetectError::from(json_err).category(), "config");
    }
}
