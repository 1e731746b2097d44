//! Outbound link extraction from a rendered page.

use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));
static ONCLICK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[onclick]").expect("static selector"));
static FORM_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("form[action]").expect("static selector"));
static ONCLICK_NAVIGATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"location(?:\.href)?\s*=\s*['"`]([^'"`]+)['"`]"#).expect("static regex")
});

/// Anchor hrefs, `onclick` navigations and form actions, resolved against
/// `page_url`, deduplicated in document order.
pub fn extract_links(html: &str, page_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(page_url) else {
        debug!("Cannot resolve links against {}", page_url);
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    let mut push = |raw: &str| {
        if let Some(absolute) = resolve_url(&base, raw)
            && seen.insert(absolute.clone())
        {
            links.push(absolute);
        }
    };

    for element in document.select(&ANCHOR_SELECTOR) {
        if let Some(href) = element.value().attr("href") {
            push(href);
        }
    }

    for element in document.select(&ONCLICK_SELECTOR) {
        if let Some(onclick) = element.value().attr("onclick")
            && let Some(target) = ONCLICK_NAVIGATION.captures(onclick).and_then(|c| c.get(1))
        {
            push(target.as_str());
        }
    }

    for element in document.select(&FORM_SELECTOR) {
        if let Some(action) = element.value().attr("action") {
            push(action);
        }
    }

    links
}

/// Absolute form of `href` relative to `base`, without fragment. Empty,
/// fragment-only and non-navigable hrefs resolve to nothing.
pub fn resolve_url(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    let lower = href.to_lowercase();
    if href.is_empty()
        || href.starts_with('#')
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
    {
        return None;
    }

    let mut resolved = base.join(href).ok()?;
    resolved.set_fragment(None);
    Some(resolved.to_string())
}
