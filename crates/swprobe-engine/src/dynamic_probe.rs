//! Service worker detection by loading the page in a real browser.
//!
//! ```text
//! Launch ──► Navigate ──► AwaitWorker ──┬──► Detected
//!              │  ▲                     ├──► NotFound
//!              └──┘ retry once on crash └──► TimedOut
//!                                              │
//!                              every path ──► Release
//! ```
//!
//! The browser can hang past its own timeouts, so every browser call also
//! runs under a [`watchdog`] that stops waiting from outside the call.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use swprobe_browser::{
    BrowserError, BrowserLauncher, BrowserOptions, BrowserSession, PageSession, WorkerTarget,
};
use swprobe_common::{retry_when, watchdog, CommonError, RetryConfig};
use swprobe_core::{DetectError, DetectResult, DetectionResult, DetectorConfig};
use swprobe_net::Fetcher;
use swprobe_sw::FeatureAnalyzer;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::probe::Probe;

/// Page scripts evaluated against the live registration.
pub mod scripts {
    /// Resolves to whether the registration holds a push subscription.
    pub const PUSH_SUBSCRIPTION: &str = "navigator.serviceWorker.getRegistration().then(swReg => swReg.pushManager.getSubscription()).then(pushReg => pushReg != null)";

    /// Resolves to the registration's scope.
    pub const SCOPE: &str = "navigator.serviceWorker.getRegistration().then(reg => reg.scope)";

    /// Resolves to whether Cache Storage holds any HTML response.
    pub const HTML_IN_CACHE: &str = r#"
        async function isHtmlInCache() {
            const cacheNames = await caches.keys();
            for (let cacheName of cacheNames) {
                const cache = await caches.open(cacheName);
                const cacheKeys = await cache.keys();
                for (let key of cacheKeys) {
                    const cachedObject = await cache.match(key);
                    if (cachedObject && cachedObject.headers) {
                        const contentType = cachedObject.headers.get('Content-Type');
                        if (contentType && contentType.startsWith('text/html')) {
                            return true;
                        }
                    }
                }
            }

            return false;
        }

        isHtmlInCache();
    "#;
}

// ==================== Lease ====================

/// Exclusive ownership of one browser and, once navigation succeeded, its page.
///
/// [`release`](Self::release) closes both. A lease dropped without being
/// released closes them on a spawned task, so every exit path releases
/// exactly once.
pub struct BrowserLease {
    browser: Option<Arc<dyn BrowserSession>>,
    page: Option<Arc<dyn PageSession>>,
}

impl BrowserLease {
    fn new(browser: Arc<dyn BrowserSession>) -> Self {
        Self {
            browser: Some(browser),
            page: None,
        }
    }

    fn attach_page(&mut self, page: Arc<dyn PageSession>) {
        self.page = Some(page);
    }

    /// The navigated page, if navigation got that far.
    pub fn page(&self) -> Option<&Arc<dyn PageSession>> {
        self.page.as_ref()
    }

    /// Close the page, then the browser.
    pub async fn release(mut self) {
        close_all(self.page.take(), self.browser.take()).await;
    }
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        let page = self.page.take();
        let browser = self.browser.take();
        if page.is_none() && browser.is_none() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Releasing browser lease on drop");
                handle.spawn(close_all(page, browser));
            }
            Err(_) => warn!("Browser lease dropped outside a runtime; browser left running"),
        }
    }
}

async fn close_all(page: Option<Arc<dyn PageSession>>, browser: Option<Arc<dyn BrowserSession>>) {
    if let Some(page) = page {
        if let Err(e) = page.close().await {
            debug!(error = %e, "Failed to close page");
        }
    }
    if let Some(browser) = browser {
        if let Err(e) = browser.close().await {
            warn!(error = %e, "Failed to close browser");
        }
    }
}

// ==================== Outcome ====================

/// The worker the browser started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    /// Absolute script URL.
    pub url: Url,
    /// The browser's handle for the worker context.
    pub target: WorkerTarget,
}

/// How a browser detection ended. Every variant owns the browser resources
/// until it is released.
pub enum ProbeOutcome {
    Detected {
        worker: WorkerIdentity,
        lease: BrowserLease,
    },
    NotFound {
        details: String,
        lease: BrowserLease,
    },
    TimedOut {
        details: String,
        lease: BrowserLease,
    },
}

impl ProbeOutcome {
    pub fn worker(&self) -> Option<&WorkerIdentity> {
        match self {
            ProbeOutcome::Detected { worker, .. } => Some(worker),
            _ => None,
        }
    }

    /// Why no worker was found.
    pub fn details(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Detected { .. } => None,
            ProbeOutcome::NotFound { details, .. } | ProbeOutcome::TimedOut { details, .. } => {
                Some(details)
            }
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, ProbeOutcome::TimedOut { .. })
    }

    pub fn into_lease(self) -> BrowserLease {
        match self {
            ProbeOutcome::Detected { lease, .. }
            | ProbeOutcome::NotFound { lease, .. }
            | ProbeOutcome::TimedOut { lease, .. } => lease,
        }
    }

    /// Release the browser resources.
    pub async fn release(self) {
        self.into_lease().release().await;
    }
}

// ==================== Probe ====================

/// Browser-driven detection strategy.
pub struct DynamicProbe {
    launcher: Arc<dyn BrowserLauncher>,
    fetcher: Arc<dyn Fetcher>,
    browser_options: BrowserOptions,
    navigation_headers: BTreeMap<String, String>,
    timeout: Duration,
    http_timeout: Duration,
}

impl DynamicProbe {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        fetcher: Arc<dyn Fetcher>,
        config: &DetectorConfig,
    ) -> Self {
        Self {
            launcher,
            fetcher,
            browser_options: config.browser.clone(),
            navigation_headers: config.navigation_headers.clone(),
            timeout: config.browser_timeout(),
            http_timeout: config.http_timeout(),
        }
    }

    /// Launch a browser, load `url` and wait for a service worker to start.
    ///
    /// Fails with [`DetectError::ResourceAcquisition`] when no browser can be
    /// launched, and with other errors when navigation fails for reasons
    /// other than time. Resources are already released when this fails.
    pub async fn detect(&self, url: &Url) -> DetectResult<ProbeOutcome> {
        let launcher = Arc::clone(&self.launcher);
        let options = self.browser_options.clone();
        let browser = guarded(self.timeout, async move { launcher.launch(&options).await })
            .await
            .map_err(|e| {
                error!(url = %url, error = %e, "Unable to launch browser");
                DetectError::resource_acquisition(e.to_string())
            })?;
        let mut lease = BrowserLease::new(Arc::clone(&browser));

        let navigated = retry_when(
            &RetryConfig::once(),
            || self.open_and_navigate(&browser, url),
            BrowserError::is_target_crashed,
        )
        .await;

        match navigated {
            Ok(page) => lease.attach_page(page),
            Err(e) if e.is_timeout() => {
                return Ok(ProbeOutcome::TimedOut {
                    details: format!(
                        "Navigation didn't complete within alloted timeout of {:?}",
                        self.timeout
                    ),
                    lease,
                });
            }
            Err(e) => {
                lease.release().await;
                return Err(match e {
                    BrowserError::Navigation(msg) => DetectError::network(msg),
                    other => DetectError::browser(other.to_string()),
                });
            }
        }

        let timeout = self.timeout;
        let waiting = Arc::clone(&browser);
        let announced = guarded(timeout, async move {
            waiting.wait_for_service_worker(timeout).await
        })
        .await;

        let outcome = match announced {
            Ok(target) => match Url::parse(&target.url) {
                Ok(worker_url) => ProbeOutcome::Detected {
                    worker: WorkerIdentity {
                        url: worker_url,
                        target,
                    },
                    lease,
                },
                Err(_) => ProbeOutcome::NotFound {
                    details: format!(
                        "Unable to parse service worker URL into absolute URI. Raw service worker URL was {}",
                        target.url
                    ),
                    lease,
                },
            },
            Err(e) if e.is_timeout() => ProbeOutcome::TimedOut {
                details: format!(
                    "No service worker detected within alloted timeout of {:?}",
                    self.timeout
                ),
                lease,
            },
            Err(e) => ProbeOutcome::NotFound {
                details: e.to_string(),
                lease,
            },
        };

        if let Some(details) = outcome.details() {
            warn!(url = %url, details = %details, "No service worker found");
        }
        Ok(outcome)
    }

    /// Open a page, set the request identity, and navigate.
    ///
    /// The page is closed again if navigation fails.
    async fn open_and_navigate(
        &self,
        browser: &Arc<dyn BrowserSession>,
        url: &Url,
    ) -> Result<Arc<dyn PageSession>, BrowserError> {
        let opening = Arc::clone(browser);
        let page = guarded(self.timeout, async move { opening.open_page().await }).await?;

        match self.navigate(&page, url).await {
            Ok(()) => Ok(page),
            Err(e) => {
                if let Err(close_err) = page.close().await {
                    debug!(error = %close_err, "Failed to close page after navigation error");
                }
                Err(e)
            }
        }
    }

    async fn navigate(&self, page: &Arc<dyn PageSession>, url: &Url) -> Result<(), BrowserError> {
        let timeout = self.timeout;
        let identifying = Arc::clone(page);
        let headers = self.navigation_headers.clone();
        guarded(timeout, async move { identifying.set_extra_headers(&headers).await }).await?;

        let navigating = Arc::clone(page);
        let target = url.clone();
        let response = guarded(timeout, async move { navigating.navigate(&target, timeout).await }).await?;

        if !response.ok() {
            return Err(BrowserError::Navigation(format!(
                "{url} couldn't be fetched, returned status code {}, {}",
                response.status, response.status_text
            )));
        }
        Ok(())
    }

    /// Evaluate a page script under the watchdog.
    async fn evaluate(&self, page: &Arc<dyn PageSession>, script: &'static str) -> Result<Value, BrowserError> {
        let page = Arc::clone(page);
        guarded(self.timeout, async move { page.evaluate(script).await }).await
    }

    /// Registration scope, resolved against `url` when relative.
    async fn read_scope(&self, page: &Arc<dyn PageSession>, url: &Url) -> Option<Url> {
        match self.evaluate(page, scripts::SCOPE).await {
            Ok(Value::String(raw)) => {
                let scope = Url::parse(&raw).or_else(|_| url.join(&raw)).ok();
                if scope.is_none() {
                    warn!(url = %url, scope = %raw, "Scope evaluation succeeded, but scope was not a valid URI");
                }
                scope
            }
            Ok(other) => {
                warn!(url = %url, value = %other, "Scope evaluation returned a non-string");
                None
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Error fetching scope of service worker");
                None
            }
        }
    }

    async fn read_push_subscription(&self, page: &Arc<dyn PageSession>, url: &Url) -> bool {
        match self.evaluate(page, scripts::PUSH_SUBSCRIPTION).await {
            Ok(value) => value.as_bool().unwrap_or(false),
            Err(e) => {
                warn!(url = %url, error = %e, "Error fetching push registration");
                false
            }
        }
    }

    /// Worker source over plain HTTP; empty on failure.
    async fn fetch_source(&self, worker_url: &Url) -> String {
        match self.fetcher.get_text(worker_url, self.http_timeout).await {
            Ok(source) => source,
            Err(e) => {
                warn!(worker = %worker_url, error = %e, "Unable to load service worker source");
                String::new()
            }
        }
    }

    /// Turn an outcome into a result, releasing its resources.
    pub async fn characterize(&self, url: &Url, outcome: ProbeOutcome) -> DetectionResult {
        let (worker, lease) = match outcome {
            ProbeOutcome::Detected { worker, lease } => (worker, lease),
            ProbeOutcome::NotFound { details, lease } => {
                lease.release().await;
                return DetectionResult::not_found(details);
            }
            ProbeOutcome::TimedOut { details, lease } => {
                lease.release().await;
                return DetectionResult::timed_out(details);
            }
        };

        let (scope, live_push) = match lease.page() {
            Some(page) => (
                self.read_scope(page, url).await,
                self.read_push_subscription(page, url).await,
            ),
            None => (None, false),
        };
        lease.release().await;

        let features = FeatureAnalyzer::analyze(&self.fetch_source(&worker.url).await);
        info!(url = %url, worker = %worker.url, "Successfully detected service worker");

        DetectionResult {
            has_push_registration: live_push || features.push,
            has_background_sync: features.background_sync,
            has_periodic_background_sync: features.periodic_sync,
            ..DetectionResult::found(worker.url)
        }
        .with_scope(scope)
    }

    /// Detect, failing with [`DetectError::NoServiceWorker`] when nothing was found.
    async fn require_worker(&self, url: &Url) -> DetectResult<(WorkerIdentity, BrowserLease)> {
        match self.detect(url).await? {
            ProbeOutcome::Detected { worker, lease } => Ok((worker, lease)),
            other => {
                let details = other.details().unwrap_or_default().to_string();
                other.release().await;
                Err(DetectError::no_service_worker(format!("{url} ({details})")))
            }
        }
    }

    /// URL of the worker the page starts, if any.
    pub async fn worker_url(&self, url: &Url) -> DetectResult<Option<Url>> {
        let outcome = self.detect(url).await?;
        let worker_url = outcome.worker().map(|worker| worker.url.clone());
        outcome.release().await;
        Ok(worker_url)
    }

    /// Scope of the page's registration. Unreadable scopes are `None`.
    pub async fn scope(&self, url: &Url) -> DetectResult<Option<Url>> {
        let (_, lease) = self.require_worker(url).await?;
        let scope = match lease.page() {
            Some(page) => self.read_scope(page, url).await,
            None => None,
        };
        lease.release().await;
        Ok(scope)
    }

    /// Whether the page's registration holds a push subscription.
    pub async fn push_status(&self, url: &Url) -> DetectResult<bool> {
        let (_, lease) = self.require_worker(url).await?;
        let subscribed = match lease.page() {
            Some(page) => self.read_push_subscription(page, url).await,
            None => false,
        };
        lease.release().await;
        Ok(subscribed)
    }

    /// Whether the worker's source handles periodic sync.
    ///
    /// Unlike detection, failing to fetch the source is an error here.
    pub async fn periodic_sync_status(&self, url: &Url) -> DetectResult<bool> {
        let (worker, lease) = self.require_worker(url).await?;
        lease.release().await;

        let source = self
            .fetcher
            .get_text(&worker.url, self.http_timeout)
            .await
            .map_err(|e| {
                error!(url = %url, worker = %worker.url, error = %e, "Error running periodicsync check");
                if e.is_timeout() {
                    DetectError::timed_out(e.to_string())
                } else {
                    DetectError::network(e.to_string())
                }
            })?;

        Ok(FeatureAnalyzer::has_periodic_sync(&source))
    }

    /// Whether the site serves HTML from Cache Storage after a reload.
    ///
    /// No worker, or any failure after detection, gives `false`.
    pub async fn offline_support(&self, url: &Url) -> DetectResult<bool> {
        let outcome = self.detect(url).await?;
        let page = outcome.worker().and(outcome_page(&outcome)).cloned();
        let Some(page) = page else {
            info!(
                url = %url,
                details = outcome.details().unwrap_or_default(),
                "Unable to detect offline support because the service worker wasn't detected"
            );
            outcome.release().await;
            return Ok(false);
        };

        // Workers often register after the first load, so their cache
        // is only populated on the second.
        let timeout = self.timeout;
        let reloading = Arc::clone(&page);
        let supported = match guarded(timeout, async move { reloading.reload(timeout).await }).await {
            Ok(()) => match self.evaluate(&page, scripts::HTML_IN_CACHE).await {
                Ok(value) => value.as_bool().unwrap_or(false),
                Err(e) => {
                    error!(url = %url, error = %e, "Unable to determine offline support due to evaluation error");
                    false
                }
            },
            Err(e) => {
                error!(url = %url, error = %e, "Unable to reload page for offline check");
                false
            }
        };

        outcome.release().await;
        Ok(supported)
    }
}

fn outcome_page(outcome: &ProbeOutcome) -> Option<&Arc<dyn PageSession>> {
    match outcome {
        ProbeOutcome::Detected { lease, .. }
        | ProbeOutcome::NotFound { lease, .. }
        | ProbeOutcome::TimedOut { lease, .. } => lease.page(),
    }
}

/// Run a browser call under the watchdog, folding its expiry into
/// [`BrowserError::Timeout`].
async fn guarded<T, Fut>(limit: Duration, operation: Fut) -> Result<T, BrowserError>
where
    Fut: Future<Output = Result<T, BrowserError>> + Send + 'static,
    T: Send + 'static,
{
    match watchdog(limit, operation).await {
        Ok(result) => result,
        Err(CommonError::Timeout(limit)) => Err(BrowserError::Timeout(limit)),
        Err(other) => Err(BrowserError::Protocol(other.to_string())),
    }
}

#[async_trait]
impl Probe for DynamicProbe {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn run(&self, url: &Url) -> DetectResult<DetectionResult> {
        match self.detect(url).await {
            Ok(outcome) => Ok(self.characterize(url, outcome).await),
            Err(e @ DetectError::ResourceAcquisition(_)) => Err(e),
            Err(e) => {
                error!(url = %url, error = %e, category = e.category(), "Error running browser service worker detection");
                let details = format!("Error during browser service worker detection. {e}");
                Ok(if e.is_timeout() {
                    DetectionResult::timed_out(details)
                } else {
                    DetectionResult::not_found(details)
                })
            }
        }
    }
}
