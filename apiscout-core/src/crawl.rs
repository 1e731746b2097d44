use crate::config::{DriverKind, RunConfig};
use crate::data::DatabaseReportWriter;
use crate::report::FileReportWriter;
use anyhow::{Context, Result};
use apiscout_scanner::{
    CrawlOutput, CrawlProgress, Crawler, EndpointProber, FormInteractor, HttpPageDriver,
    PageDriver, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// One-line rendering of a progress event for the spinner.
pub fn describe_progress(event: &CrawlProgress) -> String {
    match event {
        CrawlProgress::PageStarted {
            index,
            max_pages: Some(max),
            url,
        } => format!("[{}/{}] {}", index, max, url),
        CrawlProgress::PageStarted {
            index,
            max_pages: None,
            url,
        } => format!("[{}] {}", index, url),
        CrawlProgress::PageFailed { url, error } => format!("[!] {}: {}", url, error),
        CrawlProgress::EndpointsFound { url, count } => {
            format!("{} new endpoint(s) on {}", count, url)
        }
        CrawlProgress::LinksQueued { url, added, queued } => {
            format!("{} link(s) queued from {} ({} waiting)", added, url, queued)
        }
        CrawlProgress::Milestone {
            pages_processed,
            endpoints_found,
        } => format!(
            "{} pages processed, {} endpoints found",
            pages_processed, endpoints_found
        ),
        CrawlProgress::PageReplaced => "Page context lost, opened a fresh page".to_string(),
        CrawlProgress::Draining { pending_probes } => {
            format!("Waiting for {} pending probe(s)...", pending_probes)
        }
    }
}

/// Page driver for the configured kind.
pub fn build_driver(kind: DriverKind) -> Result<Arc<dyn PageDriver>> {
    match kind {
        DriverKind::Http => Ok(Arc::new(HttpPageDriver::new())),
        #[cfg(feature = "browser")]
        DriverKind::Browser => Ok(Arc::new(apiscout_scanner::ChromiumPageDriver::new(true))),
        #[cfg(not(feature = "browser"))]
        DriverKind::Browser => anyhow::bail!(
            "the browser driver is not available in this build (rebuild with --features browser)"
        ),
    }
}

/// Settings recorded with each stored session.
pub fn describe_run(config: &RunConfig) -> String {
    serde_json::json!({
        "target": config.target,
        "driver": config.driver.to_string(),
        "maxPages": config.limits.max_pages,
        "maxDepth": config.limits.max_depth,
        "timeoutMs": config.limits.timeout.as_millis() as u64,
        "delayMs": config.limits.delay.as_millis() as u64,
    })
    .to_string()
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message("Starting crawl...");
    pb
}

/// Execute one crawl as described by `config`, writing every report it names.
pub async fn execute_crawl(config: &RunConfig, show_progress: bool) -> Result<CrawlOutput> {
    info!(
        "Starting crawl of {} with the {} driver",
        config.target, config.driver
    );
    let driver = build_driver(config.driver)?;
    let prober = Arc::new(EndpointProber::new(&config.probe).context("Failed to build prober")?);
    let agent = Arc::new(FormInteractor::default());

    let mut crawler = Crawler::new(&config.target, driver, prober, agent)
        .with_limits(config.limits.clone())
        .with_settings(config.settings.clone())
        .with_scope_rules(config.scope.clone())
        .with_endpoint_patterns(config.endpoint_patterns.clone())
        .with_report_writer(Box::new(FileReportWriter::new(&config.output_dir)));

    if let Some(ref db_path) = config.database {
        info!("Recording scan history in {}", db_path.display());
        crawler = crawler.with_report_writer(Box::new(
            DatabaseReportWriter::new(db_path).with_configuration(describe_run(config)),
        ));
    }

    let progress_bar = show_progress.then(|| Arc::new(spinner()));
    let pages_started = Arc::new(AtomicUsize::new(0));

    if let Some(ref pb) = progress_bar {
        let pb = pb.clone();
        let count = pages_started.clone();
        let callback: ProgressCallback = Arc::new(move |event: CrawlProgress| {
            if matches!(event, CrawlProgress::PageStarted { .. }) {
                count.fetch_add(1, Ordering::Relaxed);
            }
            match event {
                CrawlProgress::PageFailed { .. } | CrawlProgress::Milestone { .. } => {
                    pb.println(describe_progress(&event))
                }
                _ => pb.set_message(describe_progress(&event)),
            }
            pb.tick();
        });
        crawler = crawler.with_progress_callback(callback);
    }

    let result = crawler.run().await;

    if let Some(ref pb) = progress_bar {
        match &result {
            Ok(output) => pb.finish_with_message(format!(
                "Crawl complete! {} pages, {} endpoints",
                output.visited_pages.len(),
                output.endpoints.len()
            )),
            Err(_) => pb.abandon_with_message(format!(
                "Crawl stopped after {} pages",
                pages_started.load(Ordering::Relaxed)
            )),
        }
    }

    if let Ok(ref output) = result
        && output.report_artifacts.is_empty()
    {
        warn!("No report was written for {}", config.target);
    }

    result.with_context(|| format!("Crawl of {} failed", config.target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_page_started_with_and_without_budget() {
        let bounded = CrawlProgress::PageStarted {
            index: 3,
            max_pages: Some(10),
            url: "https://example.com/a".into(),
        };
        assert_eq!(describe_progress(&bounded), "[3/10] https://example.com/a");

        let unbounded = CrawlProgress::PageStarted {
            index: 3,
            max_pages: None,
            url: "https://example.com/a".into(),
        };
        assert_eq!(describe_progress(&unbounded), "[3] https://example.com/a");
    }

    #[test]
    fn test_describe_links_queued() {
        let event = CrawlProgress::LinksQueued {
            url: "https://example.com/".into(),
            added: 4,
            queued: 4,
        };
        assert_eq!(
            describe_progress(&event),
            "4 link(s) queued from https://example.com/ (4 waiting)"
        );
    }

    #[cfg(not(feature = "browser"))]
    #[test]
    fn test_browser_driver_requires_feature() {
        let err = build_driver(DriverKind::Browser).err().unwrap();
        assert!(err.to_string().contains("--features browser"));
    }
}
