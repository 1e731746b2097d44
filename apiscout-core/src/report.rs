// Report generation for finished crawls

use apiscout_scanner::error::ScanError;
use apiscout_scanner::{AuthCategory, CrawlOutput, EndpointRecord, FormRecord, ReportWriter};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const RULE_WIDTH: usize = 80;
const TABLE_RULE_WIDTH: usize = 120;

/// One row of the endpoint table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRow {
    pub url: String,
    pub method: String,
    pub auth_status: String,
    pub has_form: bool,
    pub form_params: Vec<String>,
    pub status_code: u16,
    pub source: String,
    /// Plain-text line as printed under `# ENDPOINTS`.
    #[serde(skip)]
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_endpoints: usize,
    pub auth_required: usize,
    pub no_auth: usize,
    pub unclassified: usize,
    pub pages_scanned: usize,
    pub forms_found: usize,
    pub abandoned_probes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    pub domain: String,
    pub scan_date: DateTime<Utc>,
    pub duration_seconds: i64,
    pub summary: ReportSummary,
    pub endpoints: Vec<EndpointRow>,
    pub forms: Vec<FormRecord>,
    pub visited_pages: Vec<String>,
}

impl ReportData {
    pub fn from_output(output: &CrawlOutput) -> Self {
        let summary = output.summary();
        let endpoints = output
            .endpoints
            .iter()
            .map(|record| endpoint_row(record, &output.forms))
            .collect();

        ReportData {
            domain: display_domain(&output.target),
            scan_date: output.started_at,
            duration_seconds: output.duration().num_seconds(),
            summary: ReportSummary {
                total_endpoints: output.endpoints.len(),
                auth_required: summary.auth_required.len(),
                no_auth: summary.no_auth.len(),
                unclassified: summary.unclassified.len(),
                pages_scanned: output.visited_pages.len(),
                forms_found: output.forms.len(),
                abandoned_probes: output.abandoned_probes,
            },
            endpoints,
            forms: output.forms.clone(),
            visited_pages: output.visited_pages.clone(),
        }
    }
}

fn endpoint_row(record: &EndpointRecord, forms: &[FormRecord]) -> EndpointRow {
    let form = related_form(&record.url, forms);
    EndpointRow {
        url: record.url.clone(),
        method: record.method.clone(),
        auth_status: record.auth_label().to_string(),
        has_form: form.is_some(),
        form_params: form.map(|f| f.params.clone()).unwrap_or_default(),
        status_code: record.status_code,
        source: record.source.as_str().to_string(),
        line: record.to_string(),
    }
}

/// First form whose action contains the URL or is contained by it.
pub fn related_form<'a>(url: &str, forms: &'a [FormRecord]) -> Option<&'a FormRecord> {
    forms
        .iter()
        .filter(|form| !form.action.is_empty())
        .find(|form| url.contains(&form.action) || form.action.contains(url))
}

/// Every non-alphanumeric character replaced with `_`.
pub fn safe_domain(target: &str) -> String {
    target
        .trim_end_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Host (and explicit port) of the target, or the target itself when it
/// has no host.
pub fn display_domain(target: &str) -> String {
    url::Url::parse(target)
        .ok()
        .and_then(|u| {
            let host = u.host_str()?;
            Some(match u.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            })
        })
        .unwrap_or_else(|| target.to_string())
}

/// Filesystem-friendly UTC timestamp, e.g. `2024-05-01T13-45-09`.
pub fn file_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%S").to_string()
}

pub fn generate_text_report(data: &ReportData) -> String {
    let mut report = String::new();

    report.push_str("# API ENDPOINT DISCOVERY RESULTS\n");
    report.push_str(&format!("# Domain: {}\n", data.domain));
    report.push_str(&format!(
        "# Scan Date: {}\n",
        data.scan_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    report.push_str(&format!("# Duration: {} seconds\n", data.duration_seconds));
    report.push_str(&format!("# Total Endpoints: {}\n", data.summary.total_endpoints));
    report.push_str(&format!("#{}\n\n", "=".repeat(RULE_WIDTH)));

    report.push_str("URL\tMETHOD\tAUTH_STATUS\tHAS_FORM\tFORM_PARAMS\tSTATUS_CODE\n");
    report.push_str(&"-".repeat(TABLE_RULE_WIDTH));
    report.push('\n');
    for row in &data.endpoints {
        let params = if row.form_params.is_empty() {
            "N/A".to_string()
        } else {
            row.form_params.join("|")
        };
        report.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\n",
            row.url,
            row.method,
            row.auth_status,
            if row.has_form { "YES" } else { "NO" },
            params,
            row.status_code
        ));
    }

    report.push_str("\n# ENDPOINTS\n");
    report.push_str(&"-".repeat(RULE_WIDTH));
    report.push('\n');
    for row in &data.endpoints {
        report.push_str(&row.line);
        report.push('\n');
    }

    report.push('\n');
    report.push_str(&"=".repeat(RULE_WIDTH));
    report.push_str("\n# SUMMARY\n");
    report.push_str(&"=".repeat(RULE_WIDTH));
    report.push('\n');
    report.push_str(&format!("Total Endpoints: {}\n", data.summary.total_endpoints));
    report.push_str(&format!("Auth Required: {}\n", data.summary.auth_required));
    report.push_str(&format!("No Auth Required: {}\n", data.summary.no_auth));
    report.push_str(&format!("Unclassified: {}\n", data.summary.unclassified));
    report.push_str(&format!("Pages Scanned: {}\n", data.summary.pages_scanned));
    report.push_str(&format!("Forms Found: {}\n", data.summary.forms_found));
    if data.summary.abandoned_probes > 0 {
        report.push_str(&format!(
            "Unfinished Probes: {}\n",
            data.summary.abandoned_probes
        ));
    }

    if !data.forms.is_empty() {
        report.push_str("\n# FORM DETAILS\n");
        report.push_str(&"-".repeat(RULE_WIDTH));
        report.push('\n');
        for (idx, form) in data.forms.iter().enumerate() {
            report.push_str(&format!("Form {}: {} ({})\n", idx + 1, form.action, form.method));
            report.push_str(&format!("  Parameters: {}\n", form.params.join(", ")));
        }
    }

    report
}

pub fn generate_json_report(data: &ReportData) -> Result<String, serde_json::Error> {
    let json_report = serde_json::json!({
        "metadata": {
            "generator": "apiscout",
            "version": env!("CARGO_PKG_VERSION"),
            "generated_at": Utc::now().to_rfc3339(),
            "disclaimer": "For authorized security testing only"
        },
        "domain": data.domain,
        "scanDate": data.scan_date.to_rfc3339(),
        "durationSeconds": data.duration_seconds,
        "summary": {
            "totalEndpoints": data.summary.total_endpoints,
            "authRequired": data.summary.auth_required,
            "noAuth": data.summary.no_auth,
            "unclassified": data.summary.unclassified,
            "pagesScanned": data.summary.pages_scanned,
            "formsFound": data.summary.forms_found,
            "unfinishedProbes": data.summary.abandoned_probes
        },
        "endpoints": data.endpoints,
        "forms": data.forms,
        "visitedPages": data.visited_pages
    });

    serde_json::to_string_pretty(&json_report)
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}

/// Writes the TXT table and the JSON report into one directory.
pub struct FileReportWriter {
    output_dir: PathBuf,
}

impl FileReportWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn paths_for(&self, output: &CrawlOutput) -> (PathBuf, PathBuf) {
        let domain = safe_domain(&display_domain(&output.target));
        let stamp = file_timestamp(output.started_at);
        (
            self.output_dir
                .join(format!("{}_endpoints_{}.txt", domain, stamp)),
            self.output_dir
                .join(format!("{}_report_{}.json", domain, stamp)),
        )
    }
}

impl ReportWriter for FileReportWriter {
    fn name(&self) -> &str {
        "file"
    }

    fn write_report(&self, output: &CrawlOutput) -> apiscout_scanner::error::Result<Vec<String>> {
        let data = ReportData::from_output(output);
        let (txt_path, json_path) = self.paths_for(output);

        save_report(&generate_text_report(&data), &txt_path)?;
        let json = generate_json_report(&data)?;
        save_report(&json, &json_path)
            .map_err(|e| ScanError::Report(format!("{}: {}", json_path.display(), e)))?;

        Ok(vec![
            txt_path.display().to_string(),
            json_path.display().to_string(),
        ])
    }
}

/// Categorized endpoint listing for the terminal.
pub fn format_console_summary(output: &CrawlOutput) -> String {
    let summary = output.summary();
    let rule = "=".repeat(60);
    let mut text = String::new();

    text.push_str(&format!("{}\n", rule.bright_blue()));
    text.push_str(&format!("{}\n", "SCAN RESULTS".bright_white().bold()));
    text.push_str(&format!("{}\n", rule.bright_blue()));
    text.push_str(&format!("Pages scanned: {}\n", output.visited_pages.len()));
    text.push_str(&format!("Endpoints found: {}\n", summary.total()));

    if summary.total() == 0 {
        text.push_str(&format!("\n{}\n", "No API endpoints found.".yellow()));
    } else {
        for (category, records) in summary.groups() {
            if records.is_empty() {
                continue;
            }
            text.push_str(&format!("\n{} ({}):\n", category.label().bold(), records.len()));
            for record in records {
                let line = format!("  {}", record);
                let line = match category {
                    AuthCategory::AuthRequired => line.yellow(),
                    AuthCategory::NoAuth => line.green(),
                    AuthCategory::Unclassified => line.bright_black(),
                };
                text.push_str(&format!("{}\n", line));
            }
        }
    }

    if output.abandoned_probes > 0 {
        text.push_str(&format!(
            "\n{} {} probes did not finish before shutdown\n",
            "⚠".yellow(),
            output.abandoned_probes
        ));
    }
    for artifact in &output.report_artifacts {
        text.push_str(&format!("{} {}\n", "✓".green(), artifact));
    }
    text.push_str(&format!("{}\n", rule.bright_blue()));
    text
}
