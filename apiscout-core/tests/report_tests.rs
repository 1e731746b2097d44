// Tests for report generation

use apiscout_core::report::*;
use apiscout_scanner::{CrawlOutput, EndpointRecord, EndpointSource, FormRecord, ReportWriter};
use chrono::{TimeZone, Utc};
use tempfile::TempDir;

fn endpoint(url: &str, method: &str, auth: bool, status: u16) -> EndpointRecord {
    EndpointRecord {
        url: url.to_string(),
        method: method.to_string(),
        auth_required: auth,
        status_code: status,
        source: EndpointSource::Response,
    }
}

fn sample_output() -> CrawlOutput {
    CrawlOutput {
        target: "https://shop.example.com/".to_string(),
        started_at: Utc.with_ymd_and_hms(2024, 5, 1, 13, 45, 9).unwrap(),
        finished_at: Utc.with_ymd_and_hms(2024, 5, 1, 13, 46, 19).unwrap(),
        pages_processed: 3,
        visited_pages: vec![
            "https://shop.example.com/".to_string(),
            "https://shop.example.com/cart".to_string(),
            "https://shop.example.com/account".to_string(),
        ],
        endpoints: vec![
            endpoint("https://shop.example.com/api/products", "GET", false, 200),
            endpoint("https://shop.example.com/api/orders", "GET", true, 401),
            endpoint("https://shop.example.com/api/cart/add", "POST", false, 500),
        ],
        forms: vec![FormRecord {
            action: "https://shop.example.com/api/cart/add".to_string(),
            method: "POST".to_string(),
            params: vec!["sku".to_string(), "qty".to_string()],
        }],
        abandoned_probes: 0,
        report_artifacts: Vec::new(),
    }
}

// ============================================================================
// Naming helpers
// ============================================================================

#[test]
fn test_safe_domain_replaces_non_alphanumerics() {
    assert_eq!(
        safe_domain("https://shop.example.com/"),
        "https___shop_example_com"
    );
    assert_eq!(safe_domain("http://localhost:8080"), "http___localhost_8080");
}

#[test]
fn test_display_domain_is_host() {
    assert_eq!(display_domain("https://shop.example.com/"), "shop.example.com");
    assert_eq!(display_domain("http://127.0.0.1:8080/app"), "127.0.0.1:8080");
    assert_eq!(display_domain("https://shop.example.com:443/"), "shop.example.com");
    assert_eq!(display_domain("not a url"), "not a url");
}

#[test]
fn test_file_timestamp_is_filesystem_safe() {
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 13, 45, 9).unwrap();
    assert_eq!(file_timestamp(at), "2024-05-01T13-45-09");
}

#[test]
fn test_related_form_matches_by_containment() {
    let output = sample_output();
    let form = related_form("https://shop.example.com/api/cart/add", &output.forms);
    assert!(form.is_some());
    assert!(related_form("https://shop.example.com/api/orders", &output.forms).is_none());
}

#[test]
fn test_related_form_ignores_empty_action() {
    let forms = vec![FormRecord {
        action: String::new(),
        method: "GET".to_string(),
        params: vec!["q".to_string()],
    }];
    assert!(related_form("https://shop.example.com/api/search", &forms).is_none());
}

// ============================================================================
// Report data
// ============================================================================

#[test]
fn test_report_data_summary_counts() {
    let data = ReportData::from_output(&sample_output());

    assert_eq!(data.domain, "shop.example.com");
    assert_eq!(data.duration_seconds, 70);
    assert_eq!(data.summary.total_endpoints, 3);
    assert_eq!(data.summary.auth_required, 1);
    assert_eq!(data.summary.no_auth, 1);
    assert_eq!(data.summary.unclassified, 1);
    assert_eq!(data.summary.pages_scanned, 3);
    assert_eq!(data.summary.forms_found, 1);
}

#[test]
fn test_report_rows_carry_form_params() {
    let data = ReportData::from_output(&sample_output());
    let cart = data
        .endpoints
        .iter()
        .find(|row| row.url.ends_with("/api/cart/add"))
        .unwrap();

    assert!(cart.has_form);
    assert_eq!(cart.form_params, vec!["sku", "qty"]);
    assert_eq!(cart.auth_status, "NOAUTH");
}

#[test]
fn test_text_report_table() {
    let report = generate_text_report(&ReportData::from_output(&sample_output()));

    assert!(report.contains("# Domain: shop.example.com"));
    assert!(report.contains("URL\tMETHOD\tAUTH_STATUS\tHAS_FORM\tFORM_PARAMS\tSTATUS_CODE"));
    assert!(report.contains(
        "https://shop.example.com/api/orders\tGET\tAUTH REQUIRED\tNO\tN/A\t401"
    ));
    assert!(report.contains(
        "https://shop.example.com/api/cart/add\tPOST\tNOAUTH\tYES\tsku|qty\t500"
    ));
    assert!(report.contains("Auth Required: 1"));
    assert!(report.contains("Form 1: https://shop.example.com/api/cart/add (POST)"));
    assert!(!report.contains("Unfinished Probes"));
}

#[test]
fn test_text_report_lists_each_endpoint_line() {
    let mut output = sample_output();
    output.endpoints.push(EndpointRecord {
        url: "https://shop.example.com/api/wishlist".to_string(),
        method: "POST".to_string(),
        auth_required: false,
        status_code: 0,
        source: EndpointSource::Console,
    });
    let report = generate_text_report(&ReportData::from_output(&output));

    let listing = report.split("# ENDPOINTS\n").nth(1).unwrap();
    assert!(listing.contains(
        "https://shop.example.com/api/orders - AUTH REQUIRED - GET - Status: 401\n"
    ));
    assert!(listing.contains(
        "https://shop.example.com/api/products - NOAUTH - GET - Status: 200\n"
    ));
    assert!(listing.contains("https://shop.example.com/api/wishlist - NOAUTH - POST - Console\n"));
}

#[test]
fn test_text_report_mentions_abandoned_probes() {
    let mut output = sample_output();
    output.abandoned_probes = 2;
    let report = generate_text_report(&ReportData::from_output(&output));
    assert!(report.contains("Unfinished Probes: 2"));
}

#[test]
fn test_json_report_structure() {
    let json = generate_json_report(&ReportData::from_output(&sample_output())).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["metadata"]["generator"], "apiscout");
    assert_eq!(value["domain"], "shop.example.com");
    assert_eq!(value["summary"]["totalEndpoints"], 3);
    assert_eq!(value["summary"]["authRequired"], 1);
    assert_eq!(value["endpoints"].as_array().unwrap().len(), 3);
    assert_eq!(value["visitedPages"].as_array().unwrap().len(), 3);
}

// ============================================================================
// Writers
// ============================================================================

#[test]
fn test_file_report_writer_writes_both_files() {
    let dir = TempDir::new().unwrap();
    let writer = FileReportWriter::new(dir.path().join("results"));
    let output = sample_output();

    let artifacts = writer.write_report(&output).unwrap();
    assert_eq!(artifacts.len(), 2);

    let (txt, json) = writer.paths_for(&output);
    assert!(txt.ends_with("shop_example_com_endpoints_2024-05-01T13-45-09.txt"));
    assert!(json.ends_with("shop_example_com_report_2024-05-01T13-45-09.json"));
    assert!(!txt.to_string_lossy().contains("https"));
    assert!(std::fs::read_to_string(txt).unwrap().contains("/api/products"));
    assert!(std::fs::read_to_string(json).unwrap().contains("\"totalEndpoints\": 3"));
}

#[test]
fn test_file_report_names_keep_explicit_port() {
    let mut output = sample_output();
    output.target = "http://127.0.0.1:8080/".to_string();
    let (txt, json) = FileReportWriter::new("results").paths_for(&output);

    assert_eq!(
        txt,
        std::path::Path::new("results").join("127_0_0_1_8080_endpoints_2024-05-01T13-45-09.txt")
    );
    assert_eq!(
        json,
        std::path::Path::new("results").join("127_0_0_1_8080_report_2024-05-01T13-45-09.json")
    );
}

#[test]
fn test_save_report_creates_parent_directories() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a").join("b").join("report.txt");
    save_report("hello", &path).unwrap();
    assert_eq!(std::fs::read_to_string(path).unwrap(), "hello");
}

#[test]
fn test_console_summary_groups_endpoints() {
    colored::control::set_override(false);
    let mut output = sample_output();
    output.report_artifacts = vec!["results/report.json".to_string()];

    let text = format_console_summary(&output);
    assert!(text.contains("Endpoints found: 3"));
    assert!(text.contains("AUTH REQUIRED (1):"));
    assert!(text.contains("NO AUTH (1):"));
    assert!(text.contains("UNCLASSIFIED (1):"));
    assert!(text.contains(
        "https://shop.example.com/api/orders - AUTH REQUIRED - GET - Status: 401"
    ));
    assert!(text.contains("results/report.json"));
}

#[test]
fn test_console_summary_without_endpoints() {
    colored::control::set_override(false);
    let mut output = sample_output();
    output.endpoints.clear();

    let text = format_console_summary(&output);
    assert!(text.contains("No API endpoints found."));
}
