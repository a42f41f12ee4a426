//! Detector configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DetectError, DetectResult};

/// Desktop Edge identity; some sites block anything that looks like a bot.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/88.0.4324.182 Safari/537.36 Edg/88.0.705.74";

const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.9";

/// Detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Timeout for each HTTP request, in milliseconds
    pub http_timeout_ms: u64,

    /// Overall bound on the conventional worker name probe, in milliseconds
    pub existence_probe_timeout_ms: u64,

    /// Maximum concurrent existence checks
    pub existence_probe_concurrency: usize,

    /// Timeout for navigation and for the worker wait, each, in milliseconds
    pub browser_timeout_ms: u64,

    /// How long the orchestrator waits for the first positive probe
    pub race_deadline_ms: u64,

    /// Lifetime of a cached positive result, in milliseconds
    pub cache_ttl_ms: u64,

    /// Maximum cached entries
    pub cache_capacity: usize,

    /// Cache positive results by default
    pub cache_successful_results: bool,

    /// Outbound User-Agent for HTTP and browser requests
    pub user_agent: String,

    /// Accept-Language for HTTP requests
    pub accept_language: String,

    /// Extra headers set on the browser page before navigation
    pub navigation_headers: BTreeMap<String, String>,

    /// Browser launch settings
    pub browser: BrowserOptions,
}

/// Browser launch settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserOptions {
    /// Run without a window
    pub headless: bool,

    /// Browser binary; discovered on the system when absent
    pub executable_path: Option<PathBuf>,

    /// Extra command line arguments
    pub args: Vec<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            executable_path: None,
            args: vec!["--lang=en-US".to_string(), "about:blank".to_string()],
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let navigation_headers = [
            ("accept-language", "en-US"),
            ("user-agent", DEFAULT_USER_AGENT),
            ("accept-encoding", "gzip, deflate, br"),
            ("accept", DEFAULT_ACCEPT),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();

        Self {
            http_timeout_ms: 5_000,
            existence_probe_timeout_ms: 2_000,
            existence_probe_concurrency: 4,
            browser_timeout_ms: 20_000,
            race_deadline_ms: 10_000,
            cache_ttl_ms: 300_000,
            cache_capacity: 1024,
            cache_successful_results: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: "en-US".to_string(),
            navigation_headers,
            browser: BrowserOptions::default(),
        }
    }
}

impl DetectorConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> DetectResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DetectError::config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded detector config");
        Ok(config)
    }

    /// Reject values the detector can't run with.
    pub fn validate(&self) -> DetectResult<()> {
        if self.existence_probe_concurrency == 0 {
            return Err(DetectError::config(
                "existence_probe_concurrency must be at least 1",
            ));
        }
        if self.cache_capacity == 0 {
            return Err(DetectError::config("cache_capacity must be at least 1"));
        }
        if self.race_deadline_ms == 0 || self.browser_timeout_ms == 0 || self.http_timeout_ms == 0
        {
            return Err(DetectError::config("timeouts must be non-zero"));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn existence_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.existence_probe_timeout_ms)
    }

    pub fn browser_timeout(&self) -> Duration {
        Duration::from_millis(self.browser_timeout_ms)
    }

    pub fn race_deadline(&self) -> Duration {
        Duration::from_millis(self.race_deadline_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.http_timeout(), Duration::from_secs(5));
        assert_eq!(config.race_deadline(), Duration::from_secs(10));
        assert_eq!(config.browser_timeout(), Duration::from_secs(20));
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert!(config.race_deadline() < config.browser_timeout());
        assert_eq!(
            config.navigation_headers.get("accept-encoding").map(String::as_str),
            Some("gzip, deflate, br")
        );
        assert!(config.browser.args.contains(&"--lang=en-US".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: DetectorConfig =
            serde_json::from_str(r#"{ "race_deadline_ms": 3000, "browser": { "headless": false } }"#)
                .unwrap();
        assert_eq!(config.race_deadline_ms, 3000);
        assert!(!config.browser.headless);
        assert_eq!(config.browser.args.len(), 2);
        assert_eq!(config.http_timeout_ms, 5000);
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("swprobe-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "cache_capacity": 8 }"#).unwrap();
        let config = DetectorConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(config.cache_capacity, 8);
    }

    #[test]
    fn test_invalid_files() {
        let missing = DetectorConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert_eq!(missing.category(), "config");

        let zero = DetectorConfig {
            existence_probe_concurrency: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }
}
