use serde::{Deserialize, Serialize};
use std::fmt;

/// How an endpoint was first observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointSource {
    /// A request/response pair seen on the page's network stream.
    Response,
    /// A self-reported `XHR:`/`FETCH:` console line.
    Console,
}

impl EndpointSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointSource::Response => "response",
            EndpointSource::Console => "console",
        }
    }
}

/// The decisive answer of one probe sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub method: String,
    pub auth_required: bool,
    pub status_code: u16,
}

/// One discovered endpoint. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    pub url: String,
    pub method: String,
    pub auth_required: bool,
    pub status_code: u16,
    pub source: EndpointSource,
}

impl EndpointRecord {
    pub fn from_outcome(url: String, outcome: ProbeOutcome, source: EndpointSource) -> Self {
        Self {
            url,
            method: outcome.method,
            auth_required: outcome.auth_required,
            status_code: outcome.status_code,
            source,
        }
    }

    pub fn auth_label(&self) -> &'static str {
        if self.auth_required {
            "AUTH REQUIRED"
        } else {
            "NOAUTH"
        }
    }

    /// Summary bucket. A "no auth" verdict is only trusted when the probe got
    /// a non-error answer; 4xx/5xx verdicts other than 401/403 stay
    /// unclassified.
    pub fn category(&self) -> AuthCategory {
        if self.auth_required {
            AuthCategory::AuthRequired
        } else if self.status_code < 400 {
            AuthCategory::NoAuth
        } else {
            AuthCategory::Unclassified
        }
    }
}

/// `<url> - <AUTH REQUIRED|NOAUTH> - <method> - Status: <code>` for traffic
/// observations, `... - <method> - Console` for console observations.
impl fmt::Display for EndpointRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            EndpointSource::Response => write!(
                f,
                "{} - {} - {} - Status: {}",
                self.url,
                self.auth_label(),
                self.method,
                self.status_code
            ),
            EndpointSource::Console => write!(
                f,
                "{} - {} - {} - Console",
                self.url,
                self.auth_label(),
                self.method
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthCategory {
    AuthRequired,
    NoAuth,
    Unclassified,
}

impl AuthCategory {
    pub fn label(&self) -> &'static str {
        match self {
            AuthCategory::AuthRequired => "AUTH REQUIRED",
            AuthCategory::NoAuth => "NO AUTH",
            AuthCategory::Unclassified => "UNCLASSIFIED",
        }
    }
}

/// Endpoints grouped for the end-of-run summary, each group in discovery order.
#[derive(Debug, Default, Clone)]
pub struct EndpointSummary<'a> {
    pub auth_required: Vec<&'a EndpointRecord>,
    pub no_auth: Vec<&'a EndpointRecord>,
    pub unclassified: Vec<&'a EndpointRecord>,
}

impl<'a> EndpointSummary<'a> {
    pub fn categorize(records: &'a [EndpointRecord]) -> Self {
        let mut summary = Self::default();
        for record in records {
            match record.category() {
                AuthCategory::AuthRequired => summary.auth_required.push(record),
                AuthCategory::NoAuth => summary.no_auth.push(record),
                AuthCategory::Unclassified => summary.unclassified.push(record),
            }
        }
        summary
    }

    pub fn groups(&self) -> [(AuthCategory, &[&'a EndpointRecord]); 3] {
        [
            (AuthCategory::AuthRequired, &self.auth_required),
            (AuthCategory::NoAuth, &self.no_auth),
            (AuthCategory::Unclassified, &self.unclassified),
        ]
    }

    pub fn total(&self) -> usize {
        self.auth_required.len() + self.no_auth.len() + self.unclassified.len()
    }
}
