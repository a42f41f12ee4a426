//! In-memory fetcher and browser for unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use serde_json::{json, Value};
use swprobe_browser::{
    BrowserError, BrowserLauncher, BrowserOptions, BrowserSession, NavigationResponse,
    PageSession, WorkerTarget,
};
use swprobe_net::{Fetcher, NetError, Request, Response};
use url::Url;

use crate::dynamic_probe::scripts;

// ==================== Fetcher ====================

/// A canned HTTP response.
#[derive(Debug, Clone)]
pub struct FakeRoute {
    status: StatusCode,
    content_type: Option<&'static str>,
    location: Option<String>,
    body: String,
    delay: Duration,
}

impl FakeRoute {
    pub fn html(body: impl Into<String>) -> Self {
        Self::ok("text/html; charset=utf-8", body)
    }

    pub fn script(body: impl Into<String>) -> Self {
        Self::ok("application/javascript", body)
    }

    pub fn redirect(location: &str) -> Self {
        Self {
            status: StatusCode::FOUND,
            content_type: None,
            location: Some(location.to_string()),
            body: String::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn ok(content_type: &'static str, body: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: Some(content_type),
            location: None,
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            content_type: Some("text/html"),
            location: None,
            body: "not found".to_string(),
            delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct FetcherState {
    routes: Mutex<HashMap<String, FakeRoute>>,
    log: Mutex<Vec<(Method, String)>>,
}

/// Serves [`FakeRoute`]s by exact URL; anything else is a 404.
#[derive(Clone, Default)]
pub struct FakeFetcher {
    state: Arc<FetcherState>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, url: &str, route: FakeRoute) -> Self {
        let key = Url::parse(url).unwrap().to_string();
        self.state.routes.lock().unwrap().insert(key, route);
        self
    }

    pub fn requests(&self) -> usize {
        self.state.log.lock().unwrap().len()
    }

    pub fn head_requests(&self) -> usize {
        self.state
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|(method, _)| *method == Method::HEAD)
            .count()
    }

    pub fn requested(&self, url: &str) -> usize {
        let key = Url::parse(url).unwrap().to_string();
        self.state
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, requested)| *requested == key)
            .count()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        let key = request.url.to_string();
        self.state
            .log
            .lock()
            .unwrap()
            .push((request.method.clone(), key.clone()));

        let route = self
            .state
            .routes
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(FakeRoute::not_found);

        if !route.delay.is_zero() {
            match request.timeout {
                Some(timeout) if timeout < route.delay => {
                    tokio::time::sleep(timeout).await;
                    return Err(NetError::Timeout {
                        url: request.url,
                        timeout,
                    });
                }
                _ => tokio::time::sleep(route.delay).await,
            }
        }

        let mut headers = HeaderMap::new();
        if let Some(content_type) = route.content_type {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        if let Some(location) = &route.location {
            headers.insert(header::LOCATION, HeaderValue::from_str(location).unwrap());
        }

        let body = if request.method == Method::HEAD {
            Bytes::new()
        } else {
            Bytes::from(route.body)
        };

        Ok(Response::from_parts(request.url, route.status, headers, body))
    }
}

// ==================== Browser ====================

/// What one navigation attempt does.
#[derive(Debug, Clone)]
pub enum NavStep {
    Respond(u16),
    Crash,
    /// Never completes.
    Hang,
}

/// What waiting for the worker does.
#[derive(Debug, Clone)]
pub enum WorkerStep {
    Announce(String),
    /// Waits out the timeout it was given.
    Never,
    /// Ignores its timeout and never completes.
    Hang,
    /// Blocks the executor thread, then times out.
    Block(Duration),
}

/// A browser call that never completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stall {
    Launch,
    OpenPage,
    SetHeaders,
}

/// How the fake browser behaves.
#[derive(Debug, Clone)]
pub struct FakeScript {
    pub launch_error: Option<BrowserError>,
    pub stall: Option<Stall>,
    /// One step per navigation attempt; the last repeats.
    pub navigation: Vec<NavStep>,
    pub worker: WorkerStep,
    pub scope: Result<Value, BrowserError>,
    pub push: Result<Value, BrowserError>,
    pub offline: Result<Value, BrowserError>,
}

impl Default for FakeScript {
    fn default() -> Self {
        Self {
            launch_error: None,
            stall: None,
            navigation: vec![NavStep::Respond(200)],
            worker: WorkerStep::Never,
            scope: Ok(json!("https://example.com/")),
            push: Ok(json!(false)),
            offline: Ok(json!(false)),
        }
    }
}

impl FakeScript {
    pub fn with_worker(url: &str) -> Self {
        Self {
            worker: WorkerStep::Announce(url.to_string()),
            ..Self::default()
        }
    }

    pub fn without_worker() -> Self {
        Self::default()
    }

    pub fn stalling(stall: Stall) -> Self {
        Self {
            stall: Some(stall),
            ..Self::with_worker("https://example.com/sw.js")
        }
    }
}

#[derive(Default)]
struct Counters {
    launches: AtomicUsize,
    browser_closes: AtomicUsize,
    page_opens: AtomicUsize,
    page_closes: AtomicUsize,
    navigations: AtomicUsize,
    reloads: AtomicUsize,
}

struct BrowserState {
    script: FakeScript,
    counters: Counters,
    headers: Mutex<Option<BTreeMap<String, String>>>,
}

/// Scripted stand-in for a headless browser. Clones share state.
#[derive(Clone)]
pub struct FakeBrowser {
    state: Arc<BrowserState>,
}

impl BrowserState {
    async fn stall_at(&self, point: Stall) {
        if self.script.stall == Some(point) {
            futures::future::pending::<()>().await;
        }
    }
}

impl FakeBrowser {
    pub fn new(script: FakeScript) -> Self {
        Self {
            state: Arc::new(BrowserState {
                script,
                counters: Counters::default(),
                headers: Mutex::new(None),
            }),
        }
    }

    pub fn launches(&self) -> usize {
        self.state.counters.launches.load(Ordering::SeqCst)
    }

    pub fn browser_closes(&self) -> usize {
        self.state.counters.browser_closes.load(Ordering::SeqCst)
    }

    pub fn page_opens(&self) -> usize {
        self.state.counters.page_opens.load(Ordering::SeqCst)
    }

    pub fn page_closes(&self) -> usize {
        self.state.counters.page_closes.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> usize {
        self.state.counters.navigations.load(Ordering::SeqCst)
    }

    pub fn reloads(&self) -> usize {
        self.state.counters.reloads.load(Ordering::SeqCst)
    }

    pub fn last_headers(&self) -> Option<BTreeMap<String, String>> {
        self.state.headers.lock().unwrap().clone()
    }

    /// Every page and the single launched browser were closed exactly once.
    pub fn assert_released_once(&self) {
        assert_eq!(self.launches(), 1, "launches");
        assert_eq!(self.browser_closes(), 1, "browser closes");
        assert_eq!(self.page_closes(), self.page_opens(), "page closes");
    }
}

#[async_trait]
impl BrowserLauncher for FakeBrowser {
    async fn launch(&self, _options: &BrowserOptions) -> swprobe_browser::Result<Arc<dyn BrowserSession>> {
        if let Some(e) = &self.state.script.launch_error {
            return Err(e.clone());
        }
        self.state.stall_at(Stall::Launch).await;
        self.state.counters.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeSession {
            state: Arc::clone(&self.state),
            closed: AtomicUsize::new(0),
        }))
    }
}

struct FakeSession {
    state: Arc<BrowserState>,
    closed: AtomicUsize,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn open_page(&self) -> swprobe_browser::Result<Arc<dyn PageSession>> {
        self.state.stall_at(Stall::OpenPage).await;
        self.state.counters.page_opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakePage {
            state: Arc::clone(&self.state),
            closed: AtomicUsize::new(0),
        }))
    }

    async fn wait_for_service_worker(&self, timeout: Duration) -> swprobe_browser::Result<WorkerTarget> {
        match &self.state.script.worker {
            WorkerStep::Announce(url) => Ok(WorkerTarget {
                url: url.clone(),
                target_id: "worker-1".to_string(),
            }),
            WorkerStep::Never => {
                tokio::time::sleep(timeout).await;
                Err(BrowserError::Timeout(timeout))
            }
            WorkerStep::Hang => futures::future::pending().await,
            WorkerStep::Block(duration) => {
                std::thread::sleep(*duration);
                Err(BrowserError::Timeout(timeout))
            }
        }
    }

    async fn close(&self) -> swprobe_browser::Result<()> {
        assert_eq!(self.closed.fetch_add(1, Ordering::SeqCst), 0, "browser closed twice");
        self.state.counters.browser_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakePage {
    state: Arc<BrowserState>,
    closed: AtomicUsize,
}

#[async_trait]
impl PageSession for FakePage {
    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> swprobe_browser::Result<()> {
        self.state.stall_at(Stall::SetHeaders).await;
        *self.state.headers.lock().unwrap() = Some(headers.clone());
        Ok(())
    }

    async fn navigate(&self, _url: &Url, _timeout: Duration) -> swprobe_browser::Result<NavigationResponse> {
        let attempt = self.state.counters.navigations.fetch_add(1, Ordering::SeqCst);
        let steps = &self.state.script.navigation;
        let step = steps
            .get(attempt)
            .or_else(|| steps.last())
            .cloned()
            .unwrap_or(NavStep::Respond(200));

        match step {
            NavStep::Respond(status) => Ok(NavigationResponse {
                status,
                status_text: if status < 400 { "OK" } else { "Service Unavailable" }.to_string(),
            }),
            NavStep::Crash => Err(BrowserError::TargetCrashed("page crashed".to_string())),
            NavStep::Hang => futures::future::pending().await,
        }
    }

    async fn evaluate(&self, expression: &str) -> swprobe_browser::Result<Value> {
        let script = &self.state.script;
        if expression == scripts::SCOPE {
            script.scope.clone()
        } else if expression == scripts::PUSH_SUBSCRIPTION {
            script.push.clone()
        } else if expression == scripts::HTML_IN_CACHE {
            script.offline.clone()
        } else {
            Err(BrowserError::Evaluation(format!("unexpected script: {expression}")))
        }
    }

    async fn reload(&self, _timeout: Duration) -> swprobe_browser::Result<()> {
        self.state.counters.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> swprobe_browser::Result<()> {
        assert_eq!(self.closed.fetch_add(1, Ordering::SeqCst), 0, "page closed twice");
        self.state.counters.page_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
