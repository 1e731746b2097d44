//! Pattern-based detection of API/data endpoints.

use crate::error::Result;
use crate::filter::host_in_scope;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_ENDPOINT_PATTERNS: &[&str] = &[
    r"/api/",
    r"/ajax/",
    r"/rest/",
    r"/graphql",
    r"\.json(\?|$)",
    r"\.xml(\?|$)",
    r"\.php(\?|$)",
    r"\.aspx(\?|$)",
    r"\.jsp(\?|$)",
    r"/v\d+/",
    r"/service/",
    r"/endpoint/",
];

/// Case-insensitive regexes matched against the full URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointPatterns(pub Vec<String>);

impl Default for EndpointPatterns {
    fn default() -> Self {
        Self(DEFAULT_ENDPOINT_PATTERNS.iter().map(|s| s.to_string()).collect())
    }
}

#[derive(Debug, Clone)]
pub struct EndpointClassifier {
    root_host: String,
    patterns: Vec<Regex>,
}

impl EndpointClassifier {
    pub fn new(root_host: &str, patterns: &EndpointPatterns) -> Result<Self> {
        let patterns = patterns
            .0
            .iter()
            .map(|p| Regex::new(&format!("(?i){}", p)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            root_host: root_host.to_lowercase(),
            patterns,
        })
    }

    pub fn looks_like_endpoint(&self, url: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(url))
    }

    pub fn is_same_origin(&self, url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| host_in_scope(h, &self.root_host)))
            .unwrap_or(false)
    }

    /// Both predicates must hold before an endpoint is probed.
    pub fn is_candidate(&self, url: &str) -> bool {
        self.looks_like_endpoint(url) && self.is_same_origin(url)
    }
}
