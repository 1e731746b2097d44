//! Interaction Agent: best-effort form filling and button clicking.

use crate::driver::Page;
use crate::error::ScanError;
use crate::filter::UrlFilter;
use crate::links::resolve_url;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

static FORM_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("form").expect("static selector"));
static FIELD_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("input[name], select[name], textarea[name]").expect("static selector")
});

/// Clicks up to 20 interactive elements that do not navigate away.
const CLICK_SCRIPT: &str = r#"(() => {
  const candidates = Array.from(document.querySelectorAll(
    'button:not([type=submit]), [role=button], [onclick]'
  ));
  let clicked = 0;
  for (const el of candidates) {
    if (clicked >= 20) break;
    const handler = el.getAttribute('onclick') || '';
    if (/location|logout|delete|remove/i.test(handler + ' ' + el.textContent)) continue;
    try { el.click(); clicked++; } catch (e) {}
  }
  return clicked;
})()"#;

/// A form seen on a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormRecord {
    pub action: String,
    pub method: String,
    pub params: Vec<String>,
}

/// Form plus the synthesized values it will be submitted with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormFill {
    pub index: usize,
    pub record: FormRecord,
    pub fields: Vec<(String, String)>,
}

#[async_trait]
pub trait InteractionAgent: Send + Sync {
    /// Never fails: missing forms, buttons or script support just yield
    /// fewer records. Nothing outside `scope` may be requested.
    async fn interact(&self, page: &dyn Page, scope: &UrlFilter) -> Vec<FormRecord>;
}

/// Default agent. Forms are read from the DOM; filling, submitting and
/// clicking go through script evaluation when the driver supports it.
#[derive(Debug, Clone)]
pub struct FormInteractor {
    pub submit_forms: bool,
    pub click_buttons: bool,
}

impl Default for FormInteractor {
    fn default() -> Self {
        Self {
            submit_forms: true,
            click_buttons: true,
        }
    }
}

impl FormInteractor {
    async fn run_script(&self, page: &dyn Page, what: &str, script: &str) {
        match page.evaluate(script).await {
            Ok(result) => debug!("{} on {}: {}", what, page.url().await.unwrap_or_default(), result),
            Err(ScanError::Unsupported(_)) => {}
            Err(e) => debug!("{} failed: {}", what, e),
        }
    }
}

#[async_trait]
impl InteractionAgent for FormInteractor {
    async fn interact(&self, page: &dyn Page, scope: &UrlFilter) -> Vec<FormRecord> {
        let html = match page.content().await {
            Ok(html) => html,
            Err(e) => {
                debug!("No DOM to interact with: {}", e);
                return Vec::new();
            }
        };
        let page_url = page.url().await.unwrap_or_default();
        let fills = parse_forms(&html, &page_url);

        if self.submit_forms {
            let submittable = submittable_forms(&fills, scope);
            if !submittable.is_empty() {
                self.run_script(page, "Form submission", &form_submit_script(&submittable))
                    .await;
            }
        }
        if self.click_buttons {
            self.run_script(page, "Button clicks", CLICK_SCRIPT).await;
        }

        fills.into_iter().map(|f| f.record).collect()
    }
}

/// Reads every form on the page with synthesized values for its named fields.
pub fn parse_forms(html: &str, page_url: &str) -> Vec<FormFill> {
    let base = Url::parse(page_url).ok();
    let document = Html::parse_document(html);

    document
        .select(&FORM_SELECTOR)
        .enumerate()
        .map(|(index, form)| {
            let raw_action = form.value().attr("action").unwrap_or("").trim();
            let action = base
                .as_ref()
                .and_then(|b| {
                    if raw_action.is_empty() {
                        resolve_url(b, b.as_str())
                    } else {
                        resolve_url(b, raw_action)
                    }
                })
                .unwrap_or_else(|| raw_action.to_string());
            let method = form
                .value()
                .attr("method")
                .map(|m| m.trim().to_uppercase())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "GET".to_string());

            let fields: Vec<(String, String)> = form
                .select(&FIELD_SELECTOR)
                .filter_map(|field| {
                    let name = field.value().attr("name")?.to_string();
                    let value = synthesize_value(&field, &name)?;
                    Some((name, value))
                })
                .collect();

            FormFill {
                index,
                record: FormRecord {
                    action,
                    method,
                    params: fields.iter().map(|(name, _)| name.clone()).collect(),
                },
                fields,
            }
        })
        .collect()
}

/// Forms whose action passes the scope rules. The rest are recorded but
/// never sent.
pub fn submittable_forms(fills: &[FormFill], scope: &UrlFilter) -> Vec<FormFill> {
    fills
        .iter()
        .filter(|fill| {
            let admitted = scope.is_admissible(&fill.record.action);
            if !admitted {
                debug!(
                    "Not submitting form {} {}: action out of scope",
                    fill.record.method, fill.record.action
                );
            }
            admitted
        })
        .cloned()
        .collect()
}

/// Plausible value for a field, or `None` for fields that are never sent.
fn synthesize_value(field: &ElementRef<'_>, name: &str) -> Option<String> {
    let element = field.value();
    let input_type = element.attr("type").unwrap_or("text").to_lowercase();
    if matches!(input_type.as_str(), "submit" | "button" | "reset" | "image" | "file") {
        return None;
    }
    if let Some(value) = element.attr("value").filter(|v| !v.is_empty()) {
        return Some(value.to_string());
    }

    let name = name.to_lowercase();
    let value = match input_type.as_str() {
        "email" => "test@example.com",
        "password" => "Test123!",
        "number" | "range" => "1",
        "tel" => "5555555555",
        "url" => "https://example.com",
        "date" => "2024-01-01",
        "checkbox" | "radio" => "on",
        _ if name.contains("mail") => "test@example.com",
        _ if name.contains("phone") || name.contains("tel") => "5555555555",
        _ if name.contains("pass") => "Test123!",
        _ => "test",
    };
    Some(value.to_string())
}

/// Fills each form and sends it with `fetch`, so the page stays put while the
/// request still shows up in its traffic.
pub fn form_submit_script(fills: &[FormFill]) -> String {
    let payload = serde_json::to_string(fills).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"(async () => {{
  const fills = {payload};
  let sent = 0;
  for (const fill of fills) {{
    const form = document.forms[fill.index];
    if (!form) continue;
    const params = new URLSearchParams();
    for (const [name, value] of fill.fields) {{
      const field = form.elements.namedItem(name);
      if (field && 'value' in field) {{ try {{ field.value = value; }} catch (e) {{}} }}
      params.append(name, value);
    }}
    const method = fill.record.method;
    let target = fill.record.action;
    const init = {{ method, credentials: 'include' }};
    if (method === 'GET' || method === 'HEAD') {{
      target += (target.includes('?') ? '&' : '?') + params.toString();
    }} else {{
      init.body = params;
    }}
    try {{ await fetch(target, init); sent++; }} catch (e) {{}}
  }}
  return sent;
}})()"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://example.com/account/";

    #[test]
    fn test_parse_forms_records_action_method_and_params() {
        let html = r#"<form action="/api/login" method="post">
                <input type="email" name="email">
                <input type="password" name="password">
                <input type="submit" name="go" value="Go">
            </form>"#;
        let fills = parse_forms(html, PAGE);
        assert_eq!(fills.len(), 1);
        assert_eq!(
            fills[0].record,
            FormRecord {
                action: "https://example.com/api/login".to_string(),
                method: "POST".to_string(),
                params: vec!["email".to_string(), "password".to_string()],
            }
        );
        assert_eq!(
            fills[0].fields,
            vec![
                ("email".to_string(), "test@example.com".to_string()),
                ("password".to_string(), "Test123!".to_string()),
            ]
        );
    }

    #[test]
    fn test_form_without_action_targets_the_page() {
        let html = r#"<form><input name="q"><select name="sort"></select></form>"#;
        let fills = parse_forms(html, PAGE);
        assert_eq!(fills[0].record.action, PAGE);
        assert_eq!(fills[0].record.method, "GET");
        assert_eq!(fills[0].record.params, vec!["q", "sort"]);
    }

    #[test]
    fn test_existing_values_are_kept() {
        let html = r#"<form action="x"><input type="hidden" name="csrf" value="abc"></form>"#;
        let fills = parse_forms(html, PAGE);
        assert_eq!(fills[0].fields, vec![("csrf".to_string(), "abc".to_string())]);
    }

    #[test]
    fn test_out_of_scope_actions_are_recorded_but_not_submitted() {
        let html = r#"
            <form action="/account/delete" method="post"><input name="confirm"></form>
            <form action="https://evil.com/collect" method="post"><input name="data"></form>
            <form action="/api/profile" method="post"><input name="nickname"></form>"#;
        let fills = parse_forms(html, "https://example.com/settings");
        assert_eq!(fills.len(), 3);

        let root = crate::filter::parse_root_origin("https://example.com").unwrap();
        let scope = UrlFilter::new(&root, &crate::filter::ScopeRules::default()).unwrap();
        let submittable = submittable_forms(&fills, &scope);

        assert_eq!(submittable.len(), 1);
        assert_eq!(submittable[0].record.action, "https://example.com/api/profile");
        assert_eq!(submittable[0].index, 2);

        let script = form_submit_script(&submittable);
        assert!(!script.contains("/account/delete"));
        assert!(!script.contains("evil.com"));
    }

    #[test]
    fn test_no_forms() {
        assert!(parse_forms("<p>nothing here</p>", PAGE).is_empty());
    }

    #[test]
    fn test_submit_script_embeds_fills() {
        let fills = parse_forms(r#"<form action="/s"><input name="q"></form>"#, PAGE);
        let script = form_submit_script(&fills);
        assert!(script.contains("https://example.com/s"));
        assert!(script.contains("document.forms[fill.index]"));
    }
}
