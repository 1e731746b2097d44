//! URL admissibility: which discovered URLs are in scope and worth visiting.
//!
//! Everything here is pure string/URL work. Malformed input is rejected,
//! never propagated as an error.

use crate::error::{Result, ScanError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

const DEFAULT_DENIED_EXTENSIONS: &[&str] = &[
    // documents
    ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".ppt", ".pptx",
    // archives and installers
    ".zip", ".rar", ".tar", ".gz", ".exe", ".dmg", ".pkg",
    // images
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".svg", ".ico",
    // audio/video
    ".mp3", ".mp4", ".avi", ".mov", ".wmv", ".flv",
    // stylesheets and scripts
    ".css", ".js",
    // fonts
    ".woff", ".woff2", ".ttf", ".eot",
];

const DEFAULT_DENIED_PATTERNS: &[&str] = &[
    // session-destructive actions
    r"logout",
    r"signout",
    r"delete",
    r"remove",
    r"download",
    r"upload",
    r"admin/delete",
    // tracking and ads
    r"/ads/",
    r"/advertisement",
    r"/tracking",
    r"/analytics",
    // third-party social/ad domains
    r"google",
    r"facebook",
    r"twitter",
    r"linkedin",
    r"instagram",
    r"youtube",
    // non-navigable schemes
    r"mailto:",
    r"tel:",
    r"javascript:",
];

/// Ordered scope rules. Plain data so they can be loaded from a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeRules {
    /// Path suffixes (lowercase, with leading dot) that are never crawled.
    pub denied_extensions: Vec<String>,
    /// Case-insensitive regexes matched against the full URL.
    pub denied_patterns: Vec<String>,
}

impl Default for ScopeRules {
    fn default() -> Self {
        Self {
            denied_extensions: DEFAULT_DENIED_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            denied_patterns: DEFAULT_DENIED_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Compiled admissibility predicate for one scan root.
#[derive(Debug, Clone)]
pub struct UrlFilter {
    root_host: String,
    denied_extensions: Vec<String>,
    denied_patterns: Vec<Regex>,
}

impl UrlFilter {
    pub fn new(root: &Url, rules: &ScopeRules) -> Result<Self> {
        let root_host = root
            .host_str()
            .ok_or_else(|| ScanError::InvalidUrl(format!("{} has no host", root)))?
            .to_lowercase();

        let denied_patterns = rules
            .denied_patterns
            .iter()
            .map(|p| Regex::new(&format!("(?i){}", p)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            root_host,
            denied_extensions: rules
                .denied_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            denied_patterns,
        })
    }

    pub fn root_host(&self) -> &str {
        &self.root_host
    }

    pub fn is_admissible(&self, candidate: &str) -> bool {
        self.admit(candidate).is_some()
    }

    /// Applies the rules in order and returns the fragment-free URL when the
    /// candidate passes all of them.
    pub fn admit(&self, candidate: &str) -> Option<Url> {
        let Ok(mut url) = Url::parse(candidate) else {
            debug!("Rejected {}: not a valid absolute URL", candidate);
            return None;
        };

        if !matches!(url.scheme(), "http" | "https") {
            debug!("Rejected {}: scheme {}", candidate, url.scheme());
            return None;
        }

        match url.host_str() {
            Some(host) if host_in_scope(host, &self.root_host) => {}
            _ => {
                debug!("Rejected {}: outside {}", candidate, self.root_host);
                return None;
            }
        }

        let path = url.path().to_lowercase();
        if let Some(ext) = self.denied_extensions.iter().find(|ext| path.ends_with(ext.as_str())) {
            debug!("Rejected {}: extension {}", candidate, ext);
            return None;
        }

        if let Some(pattern) = self.denied_patterns.iter().find(|p| p.is_match(candidate)) {
            debug!("Rejected {}: matches {}", candidate, pattern.as_str());
            return None;
        }

        url.set_fragment(None);
        Some(url)
    }
}

/// True when `host` is the root host or one of its subdomains.
pub fn host_in_scope(host: &str, root_host: &str) -> bool {
    let host = host.to_lowercase();
    host == root_host || host.ends_with(&format!(".{}", root_host))
}

/// Parses a scan root, defaulting to https when no scheme is given.
pub fn parse_root_origin(origin: &str) -> Result<Url> {
    let origin = origin.trim();
    let with_scheme = if origin.starts_with("http://") || origin.starts_with("https://") {
        origin.to_string()
    } else {
        format!("https://{}", origin)
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", origin, e)))?;
    if url.host_str().is_none() {
        return Err(ScanError::InvalidUrl(format!("{} has no host", origin)));
    }
    Ok(url)
}

/// Admissibility against `root_origin` using the default scope rules.
pub fn is_admissible(candidate: &str, root_origin: &str) -> bool {
    parse_root_origin(root_origin)
        .and_then(|root| UrlFilter::new(&root, &ScopeRules::default()))
        .map(|filter| filter.is_admissible(candidate))
        .unwrap_or(false)
}

/// Canonical form used for dedup: no fragment, no trailing slash on
/// non-root paths. Unparseable input is returned unchanged.
pub fn normalize_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    parsed.set_fragment(None);

    let path = parsed.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = match path.trim_end_matches('/') {
            "" => "/".to_string(),
            rest => rest.to_string(),
        };
        parsed.set_path(&trimmed);
    }

    parsed.to_string()
}

/// Compares the candidate's normalized form against an already-normalized set.
pub fn is_duplicate_url(url: &str, visited: &HashSet<String>) -> bool {
    visited.contains(&normalize_url(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> UrlFilter {
        let root = parse_root_origin("https://example.com").unwrap();
        UrlFilter::new(&root, &ScopeRules::default()).unwrap()
    }

    #[test]
    fn test_same_host_and_subdomains_are_admitted() {
        let f = filter();
        assert!(f.is_admissible("https://example.com/about"));
        assert!(f.is_admissible("http://shop.example.com/cart"));
        assert!(f.is_admissible("https://a.b.example.com/"));
    }

    #[test]
    fn test_foreign_and_lookalike_hosts_are_rejected() {
        let f = filter();
        assert!(!f.is_admissible("https://evil.com/api/users"));
        assert!(!f.is_admissible("https://notexample.com/"));
        assert!(!f.is_admissible("https://example.com.evil.com/"));
    }

    #[test]
    fn test_non_http_schemes_are_rejected() {
        let f = filter();
        assert!(!f.is_admissible("ftp://example.com/file"));
        assert!(!f.is_admissible("mailto:info@example.com"));
        assert!(!f.is_admissible("javascript:void(0)"));
    }

    #[test]
    fn test_denied_extensions_win_over_host_match() {
        let f = filter();
        assert!(!f.is_admissible("https://example.com/report.pdf"));
        assert!(!f.is_admissible("https://example.com/img/LOGO.PNG"));
        assert!(!f.is_admissible("https://example.com/static/app.js"));
        assert!(f.is_admissible("https://example.com/data.json"));
    }

    #[test]
    fn test_behavioral_patterns_are_rejected() {
        let f = filter();
        assert!(!f.is_admissible("https://example.com/account/logout"));
        assert!(!f.is_admissible("https://example.com/items/1/delete"));
        assert!(!f.is_admissible("https://example.com/ads/banner"));
        assert!(!f.is_admissible("https://example.com/share?to=facebook"));
    }

    #[test]
    fn test_malformed_input_is_rejected_without_panicking() {
        let f = filter();
        assert!(!f.is_admissible(""));
        assert!(!f.is_admissible("not a url"));
        assert!(!f.is_admissible("/relative/path"));
    }

    #[test]
    fn test_admit_strips_fragment() {
        let url = filter().admit("https://example.com/docs#intro").unwrap();
        assert_eq!(url.as_str(), "https://example.com/docs");
    }

    #[test]
    fn test_custom_rules_replace_defaults() {
        let root = parse_root_origin("example.com").unwrap();
        let rules = ScopeRules {
            denied_extensions: vec![".html".to_string()],
            denied_patterns: vec![r"/private/".to_string()],
        };
        let f = UrlFilter::new(&root, &rules).unwrap();
        assert!(!f.is_admissible("https://example.com/index.html"));
        assert!(!f.is_admissible("https://example.com/private/x"));
        assert!(f.is_admissible("https://example.com/report.pdf"));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let root = parse_root_origin("example.com").unwrap();
        let rules = ScopeRules {
            denied_extensions: vec![],
            denied_patterns: vec!["(unclosed".to_string()],
        };
        assert!(matches!(
            UrlFilter::new(&root, &rules),
            Err(ScanError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_parse_root_origin_defaults_to_https() {
        assert_eq!(
            parse_root_origin("example.com").unwrap().as_str(),
            "https://example.com/"
        );
        assert_eq!(
            parse_root_origin("http://example.com:8080").unwrap().as_str(),
            "http://example.com:8080/"
        );
    }

    #[test]
    fn test_free_function_uses_default_rules() {
        assert!(is_admissible("https://example.com/a", "example.com"));
        assert!(!is_admissible("https://example.com/a.zip", "example.com"));
        assert!(!is_admissible("https://example.com/a", "http://"));
    }

    #[test]
    fn test_normalize_strips_fragment_and_trailing_slash() {
        assert_eq!(normalize_url("https://example.com/a/#x"), "https://example.com/a");
        assert_eq!(normalize_url("https://example.com/"), "https://example.com/");
        assert_eq!(normalize_url("https://example.com"), "https://example.com/");
        assert_eq!(normalize_url("garbage"), "garbage");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "https://example.com/a//",
            "https://example.com/a/?q=1#frag",
            "https://example.com///",
            "http://sub.example.com/x/y/",
            "not a url",
        ];
        for input in inputs {
            let once = normalize_url(input);
            assert_eq!(normalize_url(&once), once, "input: {}", input);
        }
    }

    #[test]
    fn test_duplicate_check_uses_normalized_form() {
        let mut visited = HashSet::new();
        visited.insert(normalize_url("https://example.com/a"));
        assert!(is_duplicate_url("https://example.com/a/", &visited));
        assert!(is_duplicate_url("https://example.com/a#top", &visited));
        assert!(!is_duplicate_url("https://example.com/b", &visited));
    }
}
