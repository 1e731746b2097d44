use super::{Page, PageDriver, PageEvent, Viewport};
use crate::error::{Result, ScanError};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Static page driver: a navigation is a plain GET of the document.
///
/// Page scripts never run, so script evaluation is unsupported and the
/// request-hook script is accepted but inert. Traffic is limited to the
/// document requests themselves.
pub struct HttpPageDriver {
    client: Mutex<Option<Client>>,
}

impl HttpPageDriver {
    pub fn new() -> Self {
        Self {
            client: Mutex::new(None),
        }
    }
}

impl Default for HttpPageDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageDriver for HttpPageDriver {
    async fn launch(&self) -> Result<()> {
        let client = Client::builder()
            .cookie_store(true)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| ScanError::DriverLaunch(e.to_string()))?;

        *self.client.lock().await = Some(client);
        debug!("HTTP page driver launched");
        Ok(())
    }

    async fn new_page(&self) -> Result<Box<dyn Page>> {
        let client = self
            .client
            .lock()
            .await
            .clone()
            .ok_or_else(|| ScanError::Other("page driver is not running".to_string()))?;
        Ok(Box::new(HttpPage::new(client)))
    }

    async fn shutdown(&self) -> Result<()> {
        self.client.lock().await.take();
        debug!("HTTP page driver shut down");
        Ok(())
    }
}

struct PageState {
    url: String,
    html: String,
    user_agent: Option<String>,
    closed: bool,
}

pub struct HttpPage {
    client: Client,
    state: Mutex<PageState>,
    events: StdMutex<Option<mpsc::UnboundedSender<PageEvent>>>,
}

impl HttpPage {
    fn new(client: Client) -> Self {
        Self {
            client,
            state: Mutex::new(PageState {
                url: "about:blank".to_string(),
                html: String::new(),
                user_agent: None,
                closed: false,
            }),
            events: StdMutex::new(None),
        }
    }

    fn emit(&self, event: PageEvent) {
        if let Ok(guard) = self.events.lock()
            && let Some(tx) = guard.as_ref()
        {
            // A dropped receiver just means nobody is listening anymore.
            let _ = tx.send(event);
        }
    }

    async fn ensure_open(&self) -> Result<()> {
        if self.state.lock().await.closed {
            return Err(ScanError::PageClosed("page has been closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Page for HttpPage {
    async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.state.lock().await.user_agent = Some(user_agent.to_string());
        Ok(())
    }

    async fn set_viewport(&self, _viewport: Viewport) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<PageEvent>> {
        self.ensure_open().await?;
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut guard) = self.events.lock() {
            *guard = Some(tx);
        }
        Ok(rx)
    }

    async fn add_init_script(&self, _script: &str) -> Result<()> {
        debug!("Init script ignored: static driver does not run page scripts");
        Ok(())
    }

    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        let user_agent = {
            let state = self.state.lock().await;
            if state.closed {
                return Err(ScanError::PageClosed("page has been closed".to_string()));
            }
            state.user_agent.clone()
        };

        self.emit(PageEvent::Request {
            url: url.to_string(),
            method: "GET".to_string(),
        });

        let mut request = self.client.get(url).timeout(timeout);
        if let Some(ua) = user_agent {
            request = request.header(USER_AGENT, ua);
        }

        let to_error = |e: reqwest::Error| {
            if e.is_timeout() {
                ScanError::Timeout(timeout.as_millis() as u64)
            } else {
                ScanError::Navigation(e.to_string())
            }
        };

        let response = request.send().await.map_err(to_error)?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("html"))
            .unwrap_or(true);

        self.emit(PageEvent::Response {
            url: final_url.clone(),
            method: "GET".to_string(),
            status,
        });

        let body = response.text().await.map_err(to_error)?;

        let mut state = self.state.lock().await;
        state.url = final_url;
        state.html = if is_html { body } else { String::new() };
        Ok(())
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<()> {
        // The document is fully fetched by the time goto returns.
        self.ensure_open().await
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
        Err(ScanError::Unsupported("script evaluation"))
    }

    async fn content(&self) -> Result<String> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(ScanError::PageClosed("page has been closed".to_string()));
        }
        Ok(state.html.clone())
    }

    async fn url(&self) -> Result<String> {
        Ok(self.state.lock().await.url.clone())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().await.closed = true;
        if let Ok(mut guard) = self.events.lock() {
            guard.take();
        }
        Ok(())
    }
}
