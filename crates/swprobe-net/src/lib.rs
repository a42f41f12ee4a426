//! # swprobe Net
//!
//! HTTP fetching for the detection probes.
//!
//! ## Design Goals
//!
//! 1. **Bounded**: every request carries its own timeout
//! 2. **Cancellable**: callers can abandon a request through a token
//! 3. **Pluggable**: probes depend on the [`Fetcher`] trait, not on reqwest

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use reqwest::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use url::Url;

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Request to {url} timed out after {timeout:?}")]
    Timeout { url: Url, timeout: Duration },

    #[error("Request cancelled")]
    Cancelled,

    #[error("{url} returned status code {status}")]
    Status { url: Url, status: StatusCode },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl NetError {
    /// Whether the request ran out of time.
    pub fn is_timeout(&self) -> bool {
        match self {
            NetError::Timeout { .. } => true,
            NetError::HttpError(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// How a request treats 3xx responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectMode {
    /// Let the client follow redirects.
    #[default]
    Follow,
    /// Return the 3xx response to the caller untouched.
    Manual,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
    pub redirect: RedirectMode,
}

impl Request {
    fn new(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            timeout: None,
            redirect: RedirectMode::Follow,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a HEAD request.
    pub fn head(url: Url) -> Self {
        Self::new(Method::HEAD, url)
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Restrict the Accept header to the given media types.
    pub fn accept(self, media_types: &[&str]) -> Self {
        match HeaderValue::from_str(&media_types.join(", ")) {
            Ok(value) => self.header(header::ACCEPT, value),
            Err(_) => self,
        }
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Return redirects to the caller instead of following them.
    pub fn manual_redirect(mut self) -> Self {
        self.redirect = RedirectMode::Manual;
        self
    }
}

/// HTTP response with a fully loaded body.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: RequestId,
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_type: Option<Mime>,
    body: Bytes,
}

impl Response {
    /// Build a response from parts, for alternative [`Fetcher`] implementations.
    pub fn from_parts(url: Url, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        let content_type = parse_content_type(&headers);
        Self {
            request_id: RequestId::new(),
            url,
            status,
            headers,
            content_type,
            body,
        }
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// One of the redirect statuses the probes follow by hand.
    pub fn is_redirect(&self) -> bool {
        matches!(
            self.status,
            StatusCode::MOVED_PERMANENTLY
                | StatusCode::FOUND
                | StatusCode::TEMPORARY_REDIRECT
                | StatusCode::PERMANENT_REDIRECT
        )
    }

    /// Redirect target, resolved against the response URL.
    pub fn location(&self) -> Option<Url> {
        let raw = self.headers.get(header::LOCATION)?.to_str().ok()?;
        self.url.join(raw).ok()
    }

    /// Raw `Content-Type` header value.
    pub fn content_type_header(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Fail with [`NetError::Status`] on a non-success status.
    pub fn error_for_status(self) -> Result<Self, NetError> {
        if self.ok() {
            Ok(self)
        } else {
            Err(NetError::Status {
                url: self.url,
                status: self.status,
            })
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn parse_content_type(headers: &HeaderMap) -> Option<Mime> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<Mime>().ok())
}

/// Something that can execute HTTP requests.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Execute a request and load its body.
    async fn fetch(&self, request: Request) -> Result<Response, NetError>;

    /// Execute a request, giving up early when `cancel` fires.
    async fn fetch_cancellable(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response, NetError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NetError::Cancelled),
            response = self.fetch(request) => response,
        }
    }

    /// GET a URL and return its body as text, failing on non-success statuses.
    async fn get_text(&self, url: &Url, timeout: Duration) -> Result<String, NetError> {
        let response = self
            .fetch(Request::get(url.clone()).timeout(timeout))
            .await?
            .error_for_status()?;
        Ok(response.text())
    }
}

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Outbound identity string sent as the User-Agent header.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Timeout for requests that don't carry their own.
    pub default_timeout: Duration,
    /// Maximum redirects followed in [`RedirectMode::Follow`].
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: "swprobe/0.1".to_string(),
            accept_language: "en-US".to_string(),
            default_timeout: Duration::from_secs(5),
            max_redirects: 10,
        }
    }
}

/// reqwest-backed [`Fetcher`].
pub struct ResourceLoader {
    client: Client,
    manual_client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let build = |policy: reqwest::redirect::Policy| {
            Client::builder()
                .user_agent(&config.user_agent)
                .timeout(config.default_timeout)
                .redirect(policy)
                .build()
                .map_err(|e| NetError::RequestFailed(e.to_string()))
        };

        let client = build(reqwest::redirect::Policy::limited(config.max_redirects))?;
        let manual_client = build(reqwest::redirect::Policy::none())?;

        info!(user_agent = %config.user_agent, "ResourceLoader initialized");

        Ok(Self {
            client,
            manual_client,
            config,
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }
}

#[async_trait]
impl Fetcher for ResourceLoader {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let client = match request.redirect {
            RedirectMode::Follow => &self.client,
            RedirectMode::Manual => &self.manual_client,
        };

        let mut req_builder = client.request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        if !request.headers.contains_key(header::ACCEPT_LANGUAGE) {
            req_builder = req_builder.header(header::ACCEPT_LANGUAGE, &self.config.accept_language);
        }

        let timeout = request.timeout.unwrap_or(self.config.default_timeout);
        req_builder = req_builder.timeout(timeout);

        let timed_out = |e: reqwest::Error| {
            if e.is_timeout() {
                NetError::Timeout {
                    url: request.url.clone(),
                    timeout,
                }
            } else {
                NetError::HttpError(e)
            }
        };

        let response = req_builder.send().await.map_err(timed_out)?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let content_type = parse_content_type(&headers);

        let body = response.bytes().await.map_err(timed_out)?;

        trace!(
            url = %url,
            status = %status,
            content_type = ?content_type,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response {
            request_id: request.id,
            url,
            status,
            headers,
            content_type,
            body,
        })
    }
}
