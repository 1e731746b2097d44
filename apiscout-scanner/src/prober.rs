//! Active multi-method probing of discovered endpoints.

use crate::error::Result;
use crate::result::ProbeOutcome;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::debug;

/// Generic methods tried after the hinted one, in order.
pub const FALLBACK_METHODS: [&str; 5] = ["GET", "POST", "PUT", "DELETE", "PATCH"];

pub const PROBE_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
pub const PROBE_ACCEPT: &str = "application/json, text/plain, */*";

/// Classifies an endpoint's accepted method and auth requirement.
#[async_trait]
pub trait Probe: Send + Sync {
    /// `None` when no attempted method produced a decisive answer.
    async fn probe(&self, url: &str, hinted_method: &str) -> Option<ProbeOutcome>;
}

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub timeout: Duration,
    pub user_agent: String,
    pub accept: String,
    pub max_redirects: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            user_agent: PROBE_USER_AGENT.to_string(),
            accept: PROBE_ACCEPT.to_string(),
            max_redirects: 5,
        }
    }
}

/// What one attempt's status code means for the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeDecision {
    Stop { auth_required: bool },
    NextMethod,
}

pub fn classify_status(status: u16) -> ProbeDecision {
    match status {
        200..=299 => ProbeDecision::Stop { auth_required: false },
        401 | 403 => ProbeDecision::Stop { auth_required: true },
        405 => ProbeDecision::NextMethod,
        _ => ProbeDecision::Stop { auth_required: false },
    }
}

/// `[hinted, GET, POST, PUT, DELETE, PATCH]` without duplicates, hinted first.
pub fn candidate_methods(hinted_method: &str) -> Vec<String> {
    let hinted = hinted_method.trim().to_uppercase();
    let mut methods: Vec<String> = Vec::with_capacity(FALLBACK_METHODS.len() + 1);
    for method in std::iter::once(hinted.as_str()).chain(FALLBACK_METHODS) {
        if !method.is_empty() && !methods.iter().any(|m| m == method) {
            methods.push(method.to_string());
        }
    }
    methods
}

/// Probes over HTTP with a short per-attempt timeout.
#[derive(Clone)]
pub struct EndpointProber {
    client: Client,
    timeout: Duration,
}

impl EndpointProber {
    pub fn new(settings: &ProbeSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Ok(ua) = HeaderValue::from_str(&settings.user_agent) {
            headers.insert(USER_AGENT, ua);
        }
        if let Ok(accept) = HeaderValue::from_str(&settings.accept) {
            headers.insert(ACCEPT, accept);
        }

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(settings.timeout)
            .pool_max_idle_per_host(10)
            .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
            .build()?;

        Ok(Self {
            client,
            timeout: settings.timeout,
        })
    }

    async fn attempt(&self, url: &str, method: &str) -> Option<u16> {
        let method = match Method::from_bytes(method.as_bytes()) {
            Ok(m) => m,
            Err(_) => {
                debug!("Skipping invalid method {:?} for {}", method, url);
                return None;
            }
        };

        match self
            .client
            .request(method.clone(), url)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => Some(response.status().as_u16()),
            Err(e) => {
                debug!("Probe {} {} failed: {}", method, url, e);
                None
            }
        }
    }
}

#[async_trait]
impl Probe for EndpointProber {
    async fn probe(&self, url: &str, hinted_method: &str) -> Option<ProbeOutcome> {
        for method in candidate_methods(hinted_method) {
            let Some(status) = self.attempt(url, &method).await else {
                continue;
            };

            match classify_status(status) {
                ProbeDecision::Stop { auth_required } => {
                    debug!("Probe {} {} -> {} (auth: {})", method, url, status, auth_required);
                    return Some(ProbeOutcome {
                        method,
                        auth_required,
                        status_code: status,
                    });
                }
                ProbeDecision::NextMethod => {
                    debug!("Probe {} {} -> 405, trying next method", method, url);
                }
            }
        }

        debug!("No decisive probe answer for {}", url);
        None
    }
}
