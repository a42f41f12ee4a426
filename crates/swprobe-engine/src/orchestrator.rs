//! Combines the static and browser probes into one detection.
//!
//! Both probes start together. A positive result from either within the race
//! deadline is final; otherwise the browser probe's own answer is awaited,
//! since it is the more reliable of the two.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};
use swprobe_browser::BrowserLauncher;
use swprobe_common::{RaceOutcome, ResultRacer};
use swprobe_core::{DetectError, DetectResult, DetectionResult, DetectorConfig, ScoreWeights};
use swprobe_net::Fetcher;
use tracing::{debug, info};
use url::{Host, Url};

use crate::cache::SuccessCache;
use crate::dynamic_probe::DynamicProbe;
use crate::probe::Probe;
use crate::static_probe::StaticProbe;

/// Whether a detection may use the positive-result cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Return a cached result without probing.
    pub read: bool,
    /// Store a positive result.
    pub write: bool,
}

impl CachePolicy {
    pub fn enabled() -> Self {
        Self {
            read: true,
            write: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            read: false,
            write: false,
        }
    }
}

/// Reject targets this service must never scan.
pub fn validate_target(url: &Url) -> DetectResult<()> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(DetectError::invalid_input(format!(
            "Unsupported scheme {} in {url}",
            url.scheme()
        )));
    }

    let local = match url.host() {
        None => true,
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.');
            domain.eq_ignore_ascii_case("localhost") || domain.ends_with(".localhost")
        }
        Some(Host::Ipv4(ip)) => is_local_v4(ip),
        Some(Host::Ipv6(ip)) => {
            ip.is_loopback() || ip.is_unspecified() || ip.to_ipv4_mapped().is_some_and(is_local_v4)
        }
    };

    if local {
        return Err(DetectError::invalid_input("URIs must not be local"));
    }
    Ok(())
}

fn is_local_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_unspecified()
}

/// Entry point for every detection operation.
pub struct DetectionOrchestrator {
    static_probe: Arc<dyn Probe>,
    dynamic_probe: Arc<DynamicProbe>,
    cache: Arc<SuccessCache>,
    config: DetectorConfig,
    weights: ScoreWeights,
}

impl DetectionOrchestrator {
    /// Build both probes over the given capabilities.
    pub fn new(
        config: DetectorConfig,
        fetcher: Arc<dyn Fetcher>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> DetectResult<Self> {
        config.validate()?;

        let static_probe = Arc::new(StaticProbe::new(Arc::clone(&fetcher), &config));
        let dynamic_probe = Arc::new(DynamicProbe::new(launcher, fetcher, &config));
        Ok(Self::from_parts(static_probe, dynamic_probe, config))
    }

    pub fn from_parts(
        static_probe: Arc<dyn Probe>,
        dynamic_probe: Arc<DynamicProbe>,
        config: DetectorConfig,
    ) -> Self {
        let cache = Arc::new(SuccessCache::new(config.cache_capacity, config.cache_ttl()));
        Self {
            static_probe,
            dynamic_probe,
            cache,
            config,
            weights: ScoreWeights::default(),
        }
    }

    pub fn cache(&self) -> &SuccessCache {
        &self.cache
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    fn default_policy(&self) -> CachePolicy {
        if self.config.cache_successful_results {
            CachePolicy::enabled()
        } else {
            CachePolicy::disabled()
        }
    }

    /// Detect with the configured cache policy.
    pub async fn detect_all(&self, url: &Url) -> DetectResult<DetectionResult> {
        self.detect_all_with(url, self.default_policy()).await
    }

    pub async fn detect_all_with(&self, url: &Url, policy: CachePolicy) -> DetectResult<DetectionResult> {
        validate_target(url)?;
        let started = Instant::now();

        if policy.read {
            if let Some(cached) = self.cache.get(url) {
                debug!(url = %url, "Returning cached detection");
                return Ok(cached);
            }
        }

        let dynamic = {
            let probe = Arc::clone(&self.dynamic_probe);
            let target = url.clone();
            async move { probe.run(&target).await }.boxed().shared()
        };
        let html = {
            let probe = Arc::clone(&self.static_probe);
            let target = url.clone();
            async move { probe.run(&target).await }.boxed()
        };

        let contenders: Vec<BoxFuture<'static, DetectResult<DetectionResult>>> =
            vec![html, dynamic.clone().boxed()];
        let raced = ResultRacer::new(self.config.race_deadline())
            .first_matching(contenders, |result| {
                matches!(result, Ok(result) if result.has_service_worker())
            })
            .await;

        let result = match raced {
            RaceOutcome::Matched(result) => result,
            RaceOutcome::NoMatch(reason) => {
                debug!(url = %url, ?reason, "No probe won the race, awaiting browser detection");
                dynamic.await
            }
        }?
        .scored(&self.weights);

        if policy.write && result.has_service_worker() {
            self.cache.insert(url, &result);
        }

        info!(
            url = %url,
            has_service_worker = result.has_service_worker(),
            details = result.no_service_worker_found_details.as_deref().unwrap_or(""),
            timed_out = result.service_worker_detection_timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Service worker detection finished"
        );
        Ok(result)
    }

    /// Detect without the cache, failing when no worker was found.
    pub async fn ensure_service_worker_found(&self, url: &Url) -> DetectResult<DetectionResult> {
        let result = self.detect_all_with(url, CachePolicy::disabled()).await?;
        if !result.has_service_worker() {
            let details = result.no_service_worker_found_details.unwrap_or_default();
            return Err(DetectError::no_service_worker(format!("{url} ({details})")));
        }
        Ok(result)
    }

    pub async fn get_worker_url(&self, url: &Url) -> DetectResult<Option<Url>> {
        validate_target(url)?;
        self.dynamic_probe.worker_url(url).await
    }

    pub async fn get_scope(&self, url: &Url) -> DetectResult<Option<Url>> {
        validate_target(url)?;
        self.dynamic_probe.scope(url).await
    }

    pub async fn get_push_status(&self, url: &Url) -> DetectResult<bool> {
        validate_target(url)?;
        self.dynamic_probe.push_status(url).await
    }

    pub async fn get_periodic_sync_status(&self, url: &Url) -> DetectResult<bool> {
        validate_target(url)?;
        self.dynamic_probe.periodic_sync_status(url).await
    }

    pub async fn get_offline_support(&self, url: &Url) -> DetectResult<bool> {
        validate_target(url)?;
        self.dynamic_probe.offline_support(url).await
    }
}
