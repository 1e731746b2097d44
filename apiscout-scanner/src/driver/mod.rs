//! Page Driver interface: the engine that loads pages and reports their traffic.
//!
//! The orchestrator only talks to these traits. [`HttpPageDriver`] is a
//! static fetch-and-parse driver; the `browser` feature adds a headless
//! Chromium driver that executes page scripts.

pub mod http;

#[cfg(feature = "browser")]
pub mod chromium;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

pub use http::HttpPageDriver;

#[cfg(feature = "browser")]
pub use chromium::ChromiumPageDriver;

/// Stable identifying user agent set on every page.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Installed on every new document so that client-side calls announce
/// themselves as `XHR: <METHOD> <URL>` / `FETCH: <METHOD> <URL>` console lines.
pub const REQUEST_HOOK_SCRIPT: &str = r#"(() => {
  const absolute = (u) => { try { return new URL(u, window.location.href).href; } catch (e) { return String(u); } };
  const OriginalXHR = window.XMLHttpRequest;
  window.XMLHttpRequest = function () {
    const xhr = new OriginalXHR();
    const open = xhr.open;
    xhr.open = function (method, url, ...rest) {
      console.log(`XHR: ${String(method).toUpperCase()} ${absolute(url)}`);
      return open.apply(this, [method, url, ...rest]);
    };
    return xhr;
  };
  const originalFetch = window.fetch;
  window.fetch = function (input, init = {}) {
    const url = typeof input === "string" ? input : (input && input.url) || String(input);
    const method = (init && init.method) || (input && input.method) || "GET";
    console.log(`FETCH: ${String(method).toUpperCase()} ${absolute(url)}`);
    return originalFetch.apply(this, arguments);
  };
})();"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1366,
            height: 768,
        }
    }
}

/// One observation from a page's network/console stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    Request { url: String, method: String },
    Response { url: String, method: String, status: u16 },
    Console { text: String },
}

/// Launches and tears down the browsing context and hands out pages.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Failure here is fatal for the run.
    async fn launch(&self) -> Result<()>;

    async fn new_page(&self) -> Result<Box<dyn Page>>;

    async fn shutdown(&self) -> Result<()>;
}

#[async_trait]
pub trait Page: Send + Sync {
    async fn set_user_agent(&self, user_agent: &str) -> Result<()>;

    async fn set_viewport(&self, viewport: Viewport) -> Result<()>;

    /// Starts a fresh event subscription. Events emitted before the call are
    /// not replayed; a later call replaces the previous subscription.
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<PageEvent>>;

    /// Registers a script to run before any page script on every navigation.
    async fn add_init_script(&self, script: &str) -> Result<()>;

    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Waits until the page stops issuing requests, or fails with
    /// `ScanError::Timeout`.
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<()>;

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Serialized DOM of the current document.
    async fn content(&self) -> Result<String>;

    /// URL of the current document, after redirects.
    async fn url(&self) -> Result<String>;

    async fn close(&self) -> Result<()>;
}

/// Applies the stable page setup used for every page the crawler owns.
pub async fn configure_page(page: &dyn Page, user_agent: &str, viewport: Viewport) -> Result<()> {
    page.set_user_agent(user_agent).await?;
    page.set_viewport(viewport).await?;
    page.add_init_script(REQUEST_HOOK_SCRIPT).await?;
    Ok(())
}
