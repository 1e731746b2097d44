use crate::classifier::{EndpointClassifier, EndpointPatterns};
use crate::driver::{DEFAULT_USER_AGENT, Page, PageDriver, Viewport, configure_page};
use crate::error::{Result, ScanError};
use crate::filter::{ScopeRules, UrlFilter, normalize_url, parse_root_origin};
use crate::interaction::{FormRecord, InteractionAgent};
use crate::links::extract_links;
use crate::monitor::{DiscoveryState, NetworkMonitor, ProbeTasks};
use crate::prober::Probe;
use crate::result::{EndpointRecord, EndpointSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Run limits. `None` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlLimits {
    pub max_pages: Option<usize>,
    pub max_depth: Option<usize>,
    pub timeout: Duration,
    pub delay: Duration,
}

impl Default for CrawlLimits {
    fn default() -> Self {
        Self {
            max_pages: None,
            max_depth: None,
            timeout: Duration::from_millis(30_000),
            delay: Duration::from_millis(1_000),
        }
    }
}

/// Fixed per-page timings and page setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSettings {
    pub settle_delay: Duration,
    pub network_idle_timeout: Duration,
    /// Pages between progress milestones; 0 disables them.
    pub progress_interval: usize,
    pub probe_drain_timeout: Duration,
    pub user_agent: String,
    pub viewport: Viewport,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(2_000),
            network_idle_timeout: Duration::from_millis(5_000),
            progress_interval: 5,
            probe_drain_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            viewport: Viewport::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Draining,
    Done,
}

/// Progress notifications for whoever renders the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlProgress {
    PageStarted {
        index: usize,
        max_pages: Option<usize>,
        url: String,
    },
    PageFailed {
        url: String,
        error: String,
    },
    EndpointsFound {
        url: String,
        count: usize,
    },
    /// Links from `url` accepted into the queue, and the queue length after.
    LinksQueued {
        url: String,
        added: usize,
        queued: usize,
    },
    Milestone {
        pages_processed: usize,
        endpoints_found: usize,
    },
    PageReplaced,
    Draining {
        pending_probes: usize,
    },
}

pub type ProgressCallback = Arc<dyn Fn(CrawlProgress) + Send + Sync>;

/// Consumes the finished run. Failures are logged by the crawler, never fatal.
pub trait ReportWriter: Send + Sync {
    fn name(&self) -> &str;

    /// Returns a description of each artifact written (usually a path).
    fn write_report(&self, output: &CrawlOutput) -> Result<Vec<String>>;
}

/// Breadth-first queue of `(url, depth)` bounded at link-discovery time.
#[derive(Debug)]
pub struct PageQueue {
    entries: VecDeque<(String, usize)>,
    capacity: Option<usize>,
}

impl PageQueue {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Capacity for a page budget: twice the budget, unbounded without one.
    pub fn for_page_budget(max_pages: Option<usize>) -> Self {
        Self::new(max_pages.map(|m| m.saturating_mul(2)))
    }

    pub fn is_full(&self) -> bool {
        self.capacity.is_some_and(|cap| self.entries.len() >= cap)
    }

    /// Returns `false` when the queue is full.
    pub fn push(&mut self, url: String, depth: usize) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries.push_back((url, depth));
        true
    }

    pub fn pop(&mut self) -> Option<(String, usize)> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Grow-only record of attempted pages, deduplicated on the normalized URL.
#[derive(Debug, Default)]
pub struct VisitedPages {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl VisitedPages {
    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(&normalize_url(url))
    }

    /// Returns `false` if the page was already visited.
    pub fn insert(&mut self, url: &str) -> bool {
        if !self.seen.insert(normalize_url(url)) {
            return false;
        }
        self.order.push(url.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.order
    }
}

/// Everything a finished run hands to the report writers.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlOutput {
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pages_processed: usize,
    pub visited_pages: Vec<String>,
    pub endpoints: Vec<EndpointRecord>,
    pub forms: Vec<FormRecord>,
    pub abandoned_probes: usize,
    pub report_artifacts: Vec<String>,
}

impl CrawlOutput {
    pub fn summary(&self) -> EndpointSummary<'_> {
        EndpointSummary::categorize(&self.endpoints)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// The page currently owned by the crawler and the monitor pump reading it.
struct PageSession {
    page: Box<dyn Page>,
    pump: JoinHandle<()>,
}

impl PageSession {
    /// Closing the page ends its event stream; the pump gets a moment to
    /// hand over buffered events before it is aborted.
    async fn close(mut self) {
        if let Err(e) = self.page.close().await {
            debug!("Closing page failed: {}", e);
        }
        if tokio::time::timeout(PUMP_FLUSH_TIMEOUT, &mut self.pump)
            .await
            .is_err()
        {
            self.pump.abort();
        }
    }
}

const PUMP_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Forms seen across the run, first occurrence per `(action, method)`.
#[derive(Default)]
struct FormLog {
    forms: Vec<FormRecord>,
    seen: HashSet<(String, String)>,
}

impl FormLog {
    fn extend(&mut self, forms: Vec<FormRecord>) {
        for form in forms {
            if self.seen.insert((form.action.clone(), form.method.clone())) {
                self.forms.push(form);
            }
        }
    }
}

pub struct Crawler {
    target: String,
    driver: Arc<dyn PageDriver>,
    prober: Arc<dyn Probe>,
    agent: Arc<dyn InteractionAgent>,
    limits: CrawlLimits,
    settings: CrawlSettings,
    scope_rules: ScopeRules,
    endpoint_patterns: EndpointPatterns,
    report_writers: Vec<Box<dyn ReportWriter>>,
    progress_callback: Option<ProgressCallback>,
    state: StdMutex<RunState>,
}

impl Crawler {
    pub fn new(
        target: impl Into<String>,
        driver: Arc<dyn PageDriver>,
        prober: Arc<dyn Probe>,
        agent: Arc<dyn InteractionAgent>,
    ) -> Self {
        Self {
            target: target.into(),
            driver,
            prober,
            agent,
            limits: CrawlLimits::default(),
            settings: CrawlSettings::default(),
            scope_rules: ScopeRules::default(),
            endpoint_patterns: EndpointPatterns::default(),
            report_writers: Vec::new(),
            progress_callback: None,
            state: StdMutex::new(RunState::Idle),
        }
    }

    pub fn with_limits(mut self, limits: CrawlLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_settings(mut self, settings: CrawlSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_scope_rules(mut self, rules: ScopeRules) -> Self {
        self.scope_rules = rules;
        self
    }

    pub fn with_endpoint_patterns(mut self, patterns: EndpointPatterns) -> Self {
        self.endpoint_patterns = patterns;
        self
    }

    pub fn with_report_writer(mut self, writer: Box<dyn ReportWriter>) -> Self {
        self.report_writers.push(writer);
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn state(&self) -> RunState {
        self.state.lock().map(|s| *s).unwrap_or(RunState::Done)
    }

    fn set_state(&self, next: RunState) {
        if let Ok(mut state) = self.state.lock() {
            debug!("Crawl state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    fn notify(&self, progress: CrawlProgress) {
        if let Some(ref callback) = self.progress_callback {
            callback(progress);
        }
    }

    /// Crawls the target once. Only an invalid target or a driver that cannot
    /// launch fails the run; every page-level problem is logged and skipped.
    pub async fn run(&self) -> Result<CrawlOutput> {
        if self.state() != RunState::Idle {
            return Err(ScanError::Other("crawler has already run".to_string()));
        }

        let root = parse_root_origin(&self.target)?;
        let filter = UrlFilter::new(&root, &self.scope_rules)?;
        let classifier = EndpointClassifier::new(filter.root_host(), &self.endpoint_patterns)?;

        let discovery = DiscoveryState::new();
        let probes = ProbeTasks::new();
        let monitor = NetworkMonitor::new(classifier, self.prober.clone(), discovery, probes.clone());

        let started_at = Utc::now();
        info!("Starting crawl of {}", root);
        self.set_state(RunState::Running);

        if let Err(e) = self.driver.launch().await {
            self.set_state(RunState::Done);
            return Err(e);
        }
        let mut session = match self.open_session(&monitor).await {
            Ok(session) => session,
            Err(e) => {
                let _ = self.driver.shutdown().await;
                self.set_state(RunState::Done);
                return Err(ScanError::DriverLaunch(format!("no usable page: {}", e)));
            }
        };

        let mut queue = PageQueue::for_page_budget(self.limits.max_pages);
        let mut visited = VisitedPages::default();
        let mut forms = FormLog::default();
        let mut processed = 0usize;
        queue.push(root.to_string(), 0);

        while !queue.is_empty() && self.limits.max_pages.is_none_or(|max| processed < max) {
            let Some((candidate, depth)) = queue.pop() else {
                break;
            };
            if visited.contains(&candidate) {
                continue;
            }
            let Some(url) = filter.admit(&candidate) else {
                debug!("Skipping inadmissible queued URL {}", candidate);
                continue;
            };
            let url = url.to_string();
            visited.insert(&url);
            processed += 1;

            info!("[{}/{}] Scanning {}", processed, budget_label(self.limits.max_pages), url);
            self.notify(CrawlProgress::PageStarted {
                index: processed,
                max_pages: self.limits.max_pages,
                url: url.clone(),
            });

            match self.process_page(session.page.as_ref(), &url, &filter).await {
                Ok((links, page_forms)) => {
                    forms.extend(page_forms);
                    let added = self.enqueue_links(&filter, &visited, &mut queue, links, depth);
                    debug!("{} new links added (queue: {})", added, queue.len());
                    self.notify(CrawlProgress::LinksQueued {
                        url: url.clone(),
                        added,
                        queued: queue.len(),
                    });

                    let found = monitor.endpoints_found_since_last_check();
                    if found > 0 {
                        info!("Found {} new endpoints on {}", found, url);
                        self.notify(CrawlProgress::EndpointsFound {
                            url: url.clone(),
                            count: found,
                        });
                    }
                }
                Err(e) => {
                    warn!("Error loading page {}: {}", url, e);
                    self.notify(CrawlProgress::PageFailed {
                        url: url.clone(),
                        error: e.to_string(),
                    });
                    if e.is_page_context_failure() {
                        session = self.replace_session(session, &monitor).await;
                    }
                }
            }

            if self.settings.progress_interval > 0
                && processed % self.settings.progress_interval == 0
            {
                let endpoints_found = monitor.state().records().await.len();
                info!(
                    "Progress: {} pages scanned, {} endpoints found",
                    processed, endpoints_found
                );
                self.notify(CrawlProgress::Milestone {
                    pages_processed: processed,
                    endpoints_found,
                });
            }

            let more = !queue.is_empty() && self.limits.max_pages.is_none_or(|max| processed < max);
            if more && !self.limits.delay.is_zero() {
                tokio::time::sleep(self.limits.delay).await;
            }
        }

        self.set_state(RunState::Draining);
        session.close().await;
        if let Err(e) = self.driver.shutdown().await {
            warn!("Page driver shutdown failed: {}", e);
        }

        self.notify(CrawlProgress::Draining {
            pending_probes: probes.pending(),
        });
        let drained = probes.drain(self.settings.probe_drain_timeout).await;
        if drained.abandoned > 0 {
            warn!(
                "{} endpoint probes did not finish within {:?}",
                drained.abandoned, self.settings.probe_drain_timeout
            );
        }

        let mut output = CrawlOutput {
            target: root.to_string(),
            started_at,
            finished_at: Utc::now(),
            pages_processed: processed,
            visited_pages: visited.into_vec(),
            endpoints: monitor.state().records().await,
            forms: forms.forms,
            abandoned_probes: drained.abandoned,
            report_artifacts: Vec::new(),
        };

        for writer in &self.report_writers {
            match writer.write_report(&output) {
                Ok(artifacts) => {
                    for artifact in &artifacts {
                        info!("{} report written: {}", writer.name(), artifact);
                    }
                    output.report_artifacts.extend(artifacts);
                }
                Err(e) => warn!("{} report failed: {}", writer.name(), e),
            }
        }

        info!(
            "Crawl complete: {} pages, {} endpoints",
            output.pages_processed,
            output.endpoints.len()
        );
        self.set_state(RunState::Done);
        Ok(output)
    }

    async fn open_session(&self, monitor: &NetworkMonitor) -> Result<PageSession> {
        let page = self.driver.new_page().await?;
        configure_page(page.as_ref(), &self.settings.user_agent, self.settings.viewport).await?;
        let events = page.subscribe().await?;
        let pump = monitor.attach(events);
        Ok(PageSession { page, pump })
    }

    /// Swaps in a fresh page with the monitor re-attached. The old session is
    /// kept if no replacement can be provisioned.
    async fn replace_session(&self, old: PageSession, monitor: &NetworkMonitor) -> PageSession {
        match self.open_session(monitor).await {
            Ok(fresh) => {
                old.close().await;
                info!("Page context lost, new page created");
                self.notify(CrawlProgress::PageReplaced);
                fresh
            }
            Err(e) => {
                error!("Could not create new page: {}", e);
                old
            }
        }
    }

    async fn process_page(
        &self,
        page: &dyn Page,
        url: &str,
        filter: &UrlFilter,
    ) -> Result<(Vec<String>, Vec<FormRecord>)> {
        page.goto(url, self.limits.timeout).await?;
        tokio::time::sleep(self.settings.settle_delay).await;

        if let Err(e) = page
            .wait_for_network_idle(self.settings.network_idle_timeout)
            .await
        {
            if e.is_page_context_failure() {
                return Err(e);
            }
            debug!("Network did not go idle on {}: {}", url, e);
        }

        let forms = self.agent.interact(page, filter).await;

        let html = page.content().await?;
        let page_url = page.url().await.unwrap_or_else(|_| url.to_string());
        Ok((extract_links(&html, &page_url), forms))
    }

    fn enqueue_links(
        &self,
        filter: &UrlFilter,
        visited: &VisitedPages,
        queue: &mut PageQueue,
        links: Vec<String>,
        depth: usize,
    ) -> usize {
        let next_depth = depth + 1;
        if self.limits.max_depth.is_some_and(|max| next_depth > max) {
            debug!("Depth {} reached, not following links", depth);
            return 0;
        }

        let mut added = 0;
        for link in links {
            if visited.contains(&link) {
                continue;
            }
            let Some(url) = filter.admit(&link) else {
                continue;
            };
            if !queue.push(url.to_string(), next_depth) {
                debug!("Queue full ({}), dropping remaining links", queue.len());
                break;
            }
            added += 1;
        }
        added
    }
}

fn budget_label(max_pages: Option<usize>) -> String {
    max_pages.map_or_else(|| "∞".to_string(), |m| m.to_string())
}
