//! Headless Chromium page driver over the DevTools protocol.

use super::{Page, PageDriver, PageEvent, Viewport};
use crate::error::{Result, ScanError};
use async_trait::async_trait;
use chromiumoxide::Page as CdpPage;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
};
use chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How long the page must go without request activity to count as idle.
const NETWORK_QUIET_WINDOW: Duration = Duration::from_millis(500);

fn driver_error(e: impl std::fmt::Display) -> ScanError {
    ScanError::Other(e.to_string())
}

/// Requests seen starting but not yet finished or failed.
#[derive(Debug, Default)]
struct InflightRequests {
    pending: HashSet<String>,
}

impl InflightRequests {
    fn started(&mut self, id: &str) {
        self.pending.insert(id.to_string());
    }

    fn settled(&mut self, id: &str) {
        self.pending.remove(id);
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

pub struct ChromiumPageDriver {
    headless: bool,
    browser: Mutex<Option<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
}

impl ChromiumPageDriver {
    pub fn new(headless: bool) -> Self {
        Self {
            headless,
            browser: Mutex::new(None),
            handler: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PageDriver for ChromiumPageDriver {
    async fn launch(&self) -> Result<()> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--no-first-run")
            .arg("--disable-extensions")
            .arg("--disable-background-timer-throttling")
            .arg("--disable-backgrounding-occluded-windows")
            .arg("--disable-renderer-backgrounding");
        if !self.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(ScanError::DriverLaunch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScanError::DriverLaunch(e.to_string()))?;

        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        *self.browser.lock().await = Some(browser);
        *self.handler.lock().await = Some(handle);
        info!("Chromium launched (headless: {})", self.headless);
        Ok(())
    }

    async fn new_page(&self) -> Result<Box<dyn Page>> {
        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| ScanError::Other("browser is not running".to_string()))?;
        let page = browser.new_page("about:blank").await.map_err(driver_error)?;
        Ok(Box::new(ChromiumPage {
            page,
            forwarder: Mutex::new(None),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(mut browser) = self.browser.lock().await.take() {
            browser.close().await.map_err(driver_error)?;
            let _ = browser.wait().await;
        }
        if let Some(handle) = self.handler.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}

pub struct ChromiumPage {
    page: CdpPage,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

fn console_text(event: &EventConsoleApiCalled) -> String {
    event
        .args
        .iter()
        .filter_map(|arg| arg.value.as_ref())
        .map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl Page for ChromiumPage {
    async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.page
            .set_user_agent(user_agent)
            .await
            .map_err(driver_error)?;
        Ok(())
    }

    async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        let params = SetDeviceMetricsOverrideParams::new(
            viewport.width as i64,
            viewport.height as i64,
            1.0,
            false,
        );
        self.page.execute(params).await.map_err(driver_error)?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<PageEvent>> {
        let mut requests = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(driver_error)?;
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(driver_error)?;
        let mut console = self
            .page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(driver_error)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            // Responses don't carry the method; remember it per request id.
            let mut methods: HashMap<String, String> = HashMap::new();
            loop {
                let event = tokio::select! {
                    Some(req) = requests.next() => {
                        methods.insert(req.request_id.inner().clone(), req.request.method.clone());
                        PageEvent::Request {
                            url: req.request.url.clone(),
                            method: req.request.method.clone(),
                        }
                    }
                    Some(resp) = responses.next() => {
                        let method = methods
                            .remove(resp.request_id.inner())
                            .unwrap_or_else(|| "GET".to_string());
                        PageEvent::Response {
                            url: resp.response.url.clone(),
                            method,
                            status: resp.response.status as u16,
                        }
                    }
                    Some(msg) = console.next() => PageEvent::Console { text: console_text(&msg) },
                    else => break,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
            debug!("Page event forwarder stopped");
        });

        if let Some(previous) = self.forwarder.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn add_init_script(&self, script: &str) -> Result<()> {
        self.page
            .evaluate_on_new_document(script)
            .await
            .map_err(driver_error)?;
        Ok(())
    }

    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Err(_) => Err(ScanError::Timeout(timeout.as_millis() as u64)),
            Ok(Err(e)) => Err(ScanError::Navigation(e.to_string())),
            Ok(Ok(_)) => Ok(()),
        }
    }

    /// Resolves once no request observed from here on is still running and
    /// nothing new has started for [`NETWORK_QUIET_WINDOW`].
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()> {
        let mut started = self
            .page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(driver_error)?;
        let mut finished = self
            .page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(driver_error)?;
        let mut failed = self
            .page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(driver_error)?;

        let quiet = async {
            let mut inflight = InflightRequests::default();
            loop {
                tokio::select! {
                    Some(req) = started.next() => inflight.started(req.request_id.inner()),
                    Some(done) = finished.next() => inflight.settled(done.request_id.inner()),
                    Some(err) = failed.next() => inflight.settled(err.request_id.inner()),
                    _ = tokio::time::sleep(NETWORK_QUIET_WINDOW) => {
                        if inflight.is_idle() {
                            return;
                        }
                    }
                }
            }
        };

        tokio::time::timeout(timeout, quiet)
            .await
            .map_err(|_| ScanError::Timeout(timeout.as_millis() as u64))
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| ScanError::Script(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn content(&self) -> Result<String> {
        self.page.content().await.map_err(driver_error)
    }

    async fn url(&self) -> Result<String> {
        Ok(self
            .page
            .url()
            .await
            .map_err(driver_error)?
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn close(&self) -> Result<()> {
        if let Some(handle) = self.forwarder.lock().await.take() {
            handle.abort();
        }
        self.page.clone().close().await.map_err(driver_error)
    }
}
