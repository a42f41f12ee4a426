//! Service worker detection by reading a page's HTML and scripts.
//!
//! Each stage runs only when the previous one found nothing:
//!
//! 1. fetch the page, following at most one redirect
//! 2. scan inline `<script>` bodies for a registration call
//! 3. fetch external scripts concurrently and scan them the same way
//! 4. if a call was found but its argument is computed at runtime, look for
//!    a worker under a conventional file name
//!
//! The discovered worker's source is then fetched and analyzed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use swprobe_common::{RaceOutcome, ResultRacer};
use swprobe_core::{DetectError, DetectResult, DetectionResult, DetectorConfig};
use swprobe_html::{extract_scripts, inline_script_bodies, ScriptElement};
use swprobe_net::{Fetcher, Request};
use swprobe_sw::{
    best_registration, candidate_urls, find_registration, is_script_content_type,
    known_library_worker, FeatureAnalyzer, Registration, SCRIPT_MIME_TYPES,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::probe::Probe;

/// Explanation attached to a negative static result.
pub const NOT_FOUND_DETAILS: &str = "Couldn't find a service worker registration via HTML parsing";

/// Where the worker search ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Discovery {
    Worker(Url),
    /// A registration call exists but the worker's location couldn't be
    /// determined.
    Unresolved,
    Nothing,
}

/// A fetched page and the URL its relative references resolve against.
struct FetchedPage {
    url: Url,
    html: String,
}

/// HTML-parsing detection strategy.
pub struct StaticProbe {
    fetcher: Arc<dyn Fetcher>,
    http_timeout: Duration,
    existence_probe_timeout: Duration,
    existence_probe_concurrency: usize,
}

impl StaticProbe {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: &DetectorConfig) -> Self {
        Self {
            fetcher,
            http_timeout: config.http_timeout(),
            existence_probe_timeout: config.existence_probe_timeout(),
            existence_probe_concurrency: config.existence_probe_concurrency.max(1),
        }
    }

    /// Run every stage, surfacing failures instead of folding them into a
    /// negative result.
    pub async fn detect(&self, url: &Url) -> DetectResult<DetectionResult> {
        let page = self.fetch_page(url).await?;
        let scripts = extract_scripts(&page.html).map_err(|e| DetectError::network(e.to_string()))?;

        let worker_url = match self.discover(&page.url, &scripts).await {
            Discovery::Worker(worker_url) => worker_url,
            Discovery::Unresolved => {
                debug!(url = %page.url, "Registration found but worker location is unknown");
                return Ok(DetectionResult::not_found(NOT_FOUND_DETAILS));
            }
            Discovery::Nothing => return Ok(DetectionResult::not_found(NOT_FOUND_DETAILS)),
        };

        let source = self.fetch_script(&worker_url, &CancellationToken::new()).await;
        let features = FeatureAnalyzer::analyze(&source);

        info!(url = %page.url, worker = %worker_url, "Found service worker via HTML parsing");

        Ok(DetectionResult {
            has_push_registration: features.push,
            has_background_sync: features.background_sync,
            has_periodic_background_sync: features.periodic_sync,
            ..DetectionResult::found(worker_url)
        }
        .with_scope(Some(page.url)))
    }

    /// GET the page, following a single 301/302/307/308 by hand.
    async fn fetch_page(&self, url: &Url) -> DetectResult<FetchedPage> {
        let get = |target: Url| {
            self.fetcher.fetch(
                Request::get(target)
                    .manual_redirect()
                    .timeout(self.http_timeout),
            )
        };

        let mut response = get(url.clone()).await.map_err(network)?;
        if response.is_redirect() {
            if let Some(location) = response.location() {
                debug!(from = %url, to = %location, "Following redirect");
                response = get(location).await.map_err(network)?;
            }
        }

        let response = response.error_for_status().map_err(|e| {
            warn!(url = %url, error = %e, "Unable to fetch page HTML");
            network(e)
        })?;

        info!(url = %response.url, "Fetched page via HTML parsing");
        Ok(FetchedPage {
            html: response.text(),
            url: response.url,
        })
    }

    async fn discover(&self, base: &Url, scripts: &[ScriptElement]) -> Discovery {
        let inline = best_registration(inline_script_bodies(scripts).filter_map(find_registration));

        let registration = match inline {
            Some(registration) => Some(registration),
            None => {
                warn!(url = %base, "No service worker registration in page HTML");
                match self.scan_external_scripts(base, scripts).await {
                    ExternalScan::Helper(worker_url) => return Discovery::Worker(worker_url),
                    ExternalScan::Registration(registration) => Some(registration),
                    ExternalScan::Nothing => None,
                }
            }
        };

        match registration {
            Some(Registration::Literal(path)) => match base.join(&path) {
                Ok(worker_url) => Discovery::Worker(worker_url),
                Err(e) => {
                    warn!(url = %base, path = %path, error = %e, "Registered worker path doesn't resolve");
                    Discovery::Unresolved
                }
            },
            Some(Registration::DynamicallyGenerated) => match self.probe_conventional_names(base).await {
                Some(worker_url) => Discovery::Worker(worker_url),
                None => Discovery::Unresolved,
            },
            // Never guess file names without a registration call; plenty of
            // sites host a worker file they don't register.
            None => Discovery::Nothing,
        }
    }

    async fn scan_external_scripts(&self, base: &Url, scripts: &[ScriptElement]) -> ExternalScan {
        let sources: Vec<Url> = scripts.iter().filter_map(|s| s.resolve_src(base)).collect();

        if let Some(worker_path) = sources.iter().find_map(known_library_worker) {
            if let Ok(worker_url) = base.join(worker_path) {
                debug!(url = %base, worker = %worker_url, "Page uses the PWA update helper");
                return ExternalScan::Helper(worker_url);
            }
        }

        let racer = ResultRacer::new(self.http_timeout);
        let cancel = racer.signal();
        let saw_dynamic = Arc::new(AtomicBool::new(false));

        let scans: Vec<_> = sources
            .into_iter()
            .map(|source| {
                let fetcher = Arc::clone(&self.fetcher);
                let cancel = cancel.clone();
                let saw_dynamic = Arc::clone(&saw_dynamic);
                let timeout = self.http_timeout;
                async move {
                    let text = fetch_text(fetcher.as_ref(), &source, timeout, &cancel).await;
                    let found = find_registration(&text);
                    if found.as_ref().is_some_and(Registration::is_dynamic) {
                        saw_dynamic.store(true, Ordering::Relaxed);
                    }
                    found
                }
            })
            .collect();

        let outcome = racer
            .first_matching(scans, |found| {
                matches!(found, Some(Registration::Literal(_)))
            })
            .await;

        match outcome {
            RaceOutcome::Matched(Some(registration)) => ExternalScan::Registration(registration),
            _ if saw_dynamic.load(Ordering::Relaxed) => {
                ExternalScan::Registration(Registration::DynamicallyGenerated)
            }
            _ => ExternalScan::Nothing,
        }
    }

    /// HEAD each conventional worker location and take the first that serves
    /// a script.
    async fn probe_conventional_names(&self, base: &Url) -> Option<Url> {
        let candidates = candidate_urls(base);
        debug!(url = %base, candidates = candidates.len(), "Probing conventional worker names");

        let racer = ResultRacer::new(self.existence_probe_timeout);
        let cancel = racer.signal();
        let permits = Arc::new(Semaphore::new(self.existence_probe_concurrency));

        let checks: Vec<_> = candidates
            .into_iter()
            .map(|candidate| {
                let fetcher = Arc::clone(&self.fetcher);
                let cancel = cancel.clone();
                let permits = Arc::clone(&permits);
                let timeout = self.http_timeout;
                async move {
                    let _permit = tokio::select! {
                        _ = cancel.cancelled() => return None,
                        permit = permits.acquire_owned() => permit.ok()?,
                    };
                    script_exists(fetcher.as_ref(), &candidate, timeout, &cancel)
                        .await
                        .then_some(candidate)
                }
            })
            .collect();

        racer
            .first_matching(checks, Option::is_some)
            .await
            .into_option()
            .flatten()
    }

    /// Fetch a script body, giving an empty string on any failure.
    async fn fetch_script(&self, url: &Url, cancel: &CancellationToken) -> String {
        fetch_text(self.fetcher.as_ref(), url, self.http_timeout, cancel).await
    }
}

enum ExternalScan {
    Helper(Url),
    Registration(Registration),
    Nothing,
}

fn network(err: swprobe_net::NetError) -> DetectError {
    if err.is_timeout() {
        DetectError::timed_out(err.to_string())
    } else {
        DetectError::network(err.to_string())
    }
}

async fn fetch_text(
    fetcher: &dyn Fetcher,
    url: &Url,
    timeout: Duration,
    cancel: &CancellationToken,
) -> String {
    let request = Request::get(url.clone()).timeout(timeout);
    match fetcher.fetch_cancellable(request, cancel).await {
        Ok(response) if response.ok() => response.text(),
        Ok(response) => {
            debug!(url = %url, status = %response.status, "Script fetch returned an error status");
            String::new()
        }
        Err(e) if e.is_timeout() => {
            warn!(url = %url, "Cancelled script fetch because it took too long");
            String::new()
        }
        Err(e) => {
            debug!(url = %url, error = %e, "Unable to load script contents");
            String::new()
        }
    }
}

async fn script_exists(
    fetcher: &dyn Fetcher,
    url: &Url,
    timeout: Duration,
    cancel: &CancellationToken,
) -> bool {
    let request = Request::head(url.clone())
        .accept(SCRIPT_MIME_TYPES)
        .timeout(timeout);

    match fetcher.fetch_cancellable(request, cancel).await {
        Ok(response) => {
            response.ok()
                && response
                    .content_type_header()
                    .is_some_and(is_script_content_type)
        }
        Err(e) => {
            debug!(url = %url, error = %e, "Existence check failed");
            false
        }
    }
}

#[async_trait]
impl Probe for StaticProbe {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn run(&self, url: &Url) -> DetectResult<DetectionResult> {
        match self.detect(url).await {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!(url = %url, error = %e, "Error running HTML parse service worker detector");
                Ok(DetectionResult::not_found(format!(
                    "Error running HTML parse service worker detector: {e}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFetcher, FakeRoute};

    const PAGE: &str = "https://example.com/";

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn config() -> DetectorConfig {
        DetectorConfig {
            http_timeout_ms: 500,
            existence_probe_timeout_ms: 500,
            ..Default::default()
        }
    }

    fn probe(fetcher: &FakeFetcher) -> StaticProbe {
        StaticProbe::new(Arc::new(fetcher.clone()), &config())
    }

    #[tokio::test]
    async fn test_inline_literal_registration() {
        let fetcher = FakeFetcher::new()
            .route(
                PAGE,
                FakeRoute::html("<script>navigator.serviceWorker.register('/sw.js')</script>"),
            )
            .route(
                "https://example.com/sw.js",
                FakeRoute::script("self.addEventListener('push', e => {})"),
            );

        let result = probe(&fetcher).run(&url(PAGE)).await.unwrap();

        assert_eq!(result.url, Some(url("https://example.com/sw.js")));
        assert_eq!(result.scope, Some(url(PAGE)));
        assert!(result.has_push_registration);
        assert!(result.no_service_worker_found_details.is_none());
    }

    #[tokio::test]
    async fn test_no_registration_never_probes_catalog() {
        let fetcher = FakeFetcher::new()
            .route(PAGE, FakeRoute::html("<p>hello</p><script>init()</script>"))
            .route("https://example.com/service-worker.js", FakeRoute::script("// unused"));

        let result = probe(&fetcher).run(&url(PAGE)).await.unwrap();

        assert!(!result.has_service_worker());
        assert_eq!(
            result.no_service_worker_found_details.as_deref(),
            Some(NOT_FOUND_DETAILS)
        );
        assert_eq!(fetcher.head_requests(), 0);
    }

    #[tokio::test]
    async fn test_dynamic_registration_resolved_by_catalog() {
        let fetcher = FakeFetcher::new()
            .route(
                PAGE,
                FakeRoute::html("<script>navigator.serviceWorker.register(swUrl)</script>"),
            )
            .route("https://example.com/ngsw-worker.js", FakeRoute::script("// angular"));

        let result = probe(&fetcher).run(&url(PAGE)).await.unwrap();

        assert_eq!(result.url, Some(url("https://example.com/ngsw-worker.js")));
        assert!(fetcher.head_requests() > 0);
    }

    #[tokio::test]
    async fn test_dynamic_registration_without_catalog_hit_is_negative() {
        let fetcher = FakeFetcher::new()
            .route(
                PAGE,
                FakeRoute::html("<script>navigator.serviceWorker.register(variableName)</script>"),
            )
            // exists, but isn't served as a script
            .route("https://example.com/sw.js", FakeRoute::html("<html>404 page</html>"));

        let result = probe(&fetcher).run(&url(PAGE)).await.unwrap();

        assert!(!result.has_service_worker());
        assert!(result.no_service_worker_found_details.is_some());
    }

    #[tokio::test]
    async fn test_registration_in_external_script() {
        let fetcher = FakeFetcher::new()
            .route(
                "https://example.com/app/",
                FakeRoute::html(r#"<script src="vendor.js"></script><script src="main.js"></script>"#),
            )
            .route("https://example.com/app/vendor.js", FakeRoute::script("var x = 1;"))
            .route(
                "https://example.com/app/main.js",
                FakeRoute::script(r#"navigator.serviceWorker.register("worker.js")"#),
            )
            .route("https://example.com/app/worker.js", FakeRoute::script(""));

        let result = probe(&fetcher)
            .run(&url("https://example.com/app/"))
            .await
            .unwrap();

        assert_eq!(result.url, Some(url("https://example.com/app/worker.js")));
    }

    #[tokio::test]
    async fn test_dynamic_call_in_external_script_probes_local_names_first() {
        let fetcher = FakeFetcher::new()
            .route(
                "https://example.com/blog/",
                FakeRoute::html(r#"<script src="/bundle.js"></script>"#),
            )
            .route(
                "https://example.com/bundle.js",
                FakeRoute::script("navigator.serviceWorker.register(cfg.sw)"),
            )
            .route("https://example.com/blog/sw.js", FakeRoute::script("// blog worker"));

        let result = probe(&fetcher)
            .run(&url("https://example.com/blog/"))
            .await
            .unwrap();

        assert_eq!(result.url, Some(url("https://example.com/blog/sw.js")));
    }

    #[tokio::test]
    async fn test_update_helper_short_circuits() {
        let fetcher = FakeFetcher::new().route(
            PAGE,
            FakeRoute::html(
                r#"<script type="module" src="https://cdn.jsdelivr.net/npm/@pwabuilder/pwaupdate"></script>"#,
            ),
        );

        let result = probe(&fetcher).run(&url(PAGE)).await.unwrap();

        assert_eq!(result.url, Some(url("https://example.com/pwabuilder-sw.js")));
        assert_eq!(
            fetcher.requested("https://cdn.jsdelivr.net/npm/@pwabuilder/pwaupdate"),
            0
        );
    }

    #[tokio::test]
    async fn test_single_redirect_becomes_base() {
        let fetcher = FakeFetcher::new()
            .route(PAGE, FakeRoute::redirect("https://www.example.com/home/"))
            .route(
                "https://www.example.com/home/",
                FakeRoute::html("<script>navigator.serviceWorker.register('sw.js')</script>"),
            );

        let result = probe(&fetcher).run(&url(PAGE)).await.unwrap();

        assert_eq!(result.url, Some(url("https://www.example.com/home/sw.js")));
        assert_eq!(result.scope, Some(url("https://www.example.com/home/")));
    }

    #[tokio::test]
    async fn test_redirect_chain_is_not_followed() {
        let fetcher = FakeFetcher::new()
            .route(PAGE, FakeRoute::redirect("https://example.com/a"))
            .route("https://example.com/a", FakeRoute::redirect("https://example.com/b"))
            .route(
                "https://example.com/b",
                FakeRoute::html("<script>navigator.serviceWorker.register('/sw.js')</script>"),
            );

        let result = probe(&fetcher).run(&url(PAGE)).await.unwrap();

        assert!(!result.has_service_worker());
        assert_eq!(fetcher.requested("https://example.com/b"), 0);
    }

    #[tokio::test]
    async fn test_unreachable_page_is_negative_not_error() {
        let fetcher = FakeFetcher::new();

        let result = probe(&fetcher).run(&url(PAGE)).await.unwrap();

        assert!(!result.has_service_worker());
        assert!(result
            .no_service_worker_found_details
            .unwrap()
            .starts_with("Error running HTML parse service worker detector"));
    }

    #[tokio::test]
    async fn test_slow_page_fails_as_timeout() {
        let fetcher = FakeFetcher::new().route(
            PAGE,
            FakeRoute::html("<p>slow</p>").with_delay(Duration::from_secs(2)),
        );

        let err = probe(&fetcher).detect(&url(PAGE)).await.unwrap_err();
        assert!(err.is_timeout(), "{err}");

        let err = probe(&FakeFetcher::new()).detect(&url(PAGE)).await.unwrap_err();
        assert!(matches!(err, DetectError::Network(_)));
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn test_worker_source_failure_keeps_detection() {
        let fetcher = FakeFetcher::new().route(
            PAGE,
            FakeRoute::html("<script>navigator.serviceWorker.register('/missing-sw.js')</script>"),
        );

        let result = probe(&fetcher).run(&url(PAGE)).await.unwrap();

        assert_eq!(result.url, Some(url("https://example.com/missing-sw.js")));
        assert!(!result.has_push_registration);
        assert!(!result.has_background_sync);
    }
}
