//! Chrome/Chromium backend over the DevTools protocol.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams};
use chromiumoxide::cdp::browser_protocol::target::EventTargetCreated;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::listeners::EventStream;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::{
    BrowserError, BrowserLauncher, BrowserOptions, BrowserSession, NavigationResponse,
    PageSession, Result, WorkerTarget, TARGET_CRASHED_MARKER,
};

const SERVICE_WORKER_TARGET: &str = "service_worker";

fn protocol_error(err: CdpError) -> BrowserError {
    let message = err.to_string();
    if message.contains(TARGET_CRASHED_MARKER) {
        BrowserError::TargetCrashed(message)
    } else {
        BrowserError::Protocol(message)
    }
}

fn navigation_error(err: CdpError) -> BrowserError {
    match protocol_error(err) {
        BrowserError::Protocol(message) => BrowserError::Navigation(message),
        other => other,
    }
}

/// Launches a local Chrome/Chromium.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromiumLauncher;

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, options: &BrowserOptions) -> Result<Arc<dyn BrowserSession>> {
        let mut builder = BrowserConfig::builder().args(options.args.clone());
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &options.executable_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(BrowserError::LaunchFailed)?;

        let (browser, mut events) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        // The connection only makes progress while its event stream is polled
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "Browser event error");
                }
            }
        });

        // Subscribe before any navigation so no worker target is missed
        let targets = match browser.event_listener::<EventTargetCreated>().await {
            Ok(targets) => targets,
            Err(e) => {
                handler.abort();
                return Err(BrowserError::LaunchFailed(e.to_string()));
            }
        };

        info!(headless = options.headless, "Browser launched");

        Ok(Arc::new(ChromiumSession {
            browser: Mutex::new(browser),
            targets: Mutex::new(targets),
            handler,
        }))
    }
}

struct ChromiumSession {
    browser: Mutex<Browser>,
    targets: Mutex<EventStream<EventTargetCreated>>,
    handler: JoinHandle<()>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn open_page(&self) -> Result<Arc<dyn PageSession>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(protocol_error)?;
        Ok(Arc::new(ChromiumPage { page }))
    }

    async fn wait_for_service_worker(&self, timeout: Duration) -> Result<WorkerTarget> {
        let mut targets = self.targets.lock().await;

        let wait = async {
            while let Some(created) = targets.next().await {
                let info = &created.target_info;
                if info.r#type == SERVICE_WORKER_TARGET {
                    return Ok(WorkerTarget {
                        url: info.url.clone(),
                        target_id: info.target_id.inner().clone(),
                    });
                }
            }
            Err(BrowserError::Protocol(
                "browser disconnected before a service worker started".to_string(),
            ))
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| BrowserError::Timeout(timeout))?
    }

    async fn close(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        let closed = browser.close().await.map(|_| ()).map_err(protocol_error);
        if let Err(e) = browser.wait().await {
            debug!(error = %e, "Browser process did not exit cleanly");
        }
        self.handler.abort();
        closed
    }
}

struct ChromiumPage {
    page: Page,
}

#[async_trait]
impl PageSession for ChromiumPage {
    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> Result<()> {
        let headers =
            serde_json::to_value(headers).map_err(|e| BrowserError::Protocol(e.to_string()))?;
        self.page
            .execute(SetExtraHttpHeadersParams::new(Headers::new(headers)))
            .await
            .map_err(protocol_error)?;
        Ok(())
    }

    async fn navigate(&self, url: &Url, timeout: Duration) -> Result<NavigationResponse> {
        let navigation = async {
            self.page.goto(url.as_str()).await?;
            self.page.wait_for_navigation_response().await
        };

        let request = tokio::time::timeout(timeout, navigation)
            .await
            .map_err(|_| BrowserError::Timeout(timeout))?
            .map_err(navigation_error)?;

        let response = request
            .as_ref()
            .and_then(|request| request.response.as_ref())
            .ok_or_else(|| BrowserError::Navigation(format!("{url} produced no response")))?;

        Ok(NavigationResponse {
            status: u16::try_from(response.status).unwrap_or_default(),
            status_text: response.status_text.clone(),
        })
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(BrowserError::Evaluation)?;

        let result = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|e| BrowserError::Evaluation(e.to_string()))?;

        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn reload(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.page.reload())
            .await
            .map_err(|_| BrowserError::Timeout(timeout))?
            .map_err(navigation_error)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.page.clone().close().await.map_err(protocol_error)
    }
}
