//! Network Traffic Monitor: turns page traffic into probed endpoint records.

use crate::classifier::EndpointClassifier;
use crate::driver::PageEvent;
use crate::prober::Probe;
use crate::result::{EndpointRecord, EndpointSource};
use regex::Regex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Matches the lines written by the request hook, e.g. `XHR: POST https://a/api`.
static DIAGNOSTIC_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:XHR|FETCH):\s*([A-Za-z]+)\s+(https?://\S+)").expect("static regex")
});

#[derive(Default)]
struct Discovery {
    visited_endpoints: HashSet<String>,
    results: Vec<EndpointRecord>,
}

/// Endpoint state shared between the crawl loop and background probes.
#[derive(Clone, Default)]
pub struct DiscoveryState {
    inner: Arc<Mutex<Discovery>>,
}

impl DiscoveryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only the first time `url` is claimed.
    pub async fn claim_endpoint(&self, url: &str) -> bool {
        self.inner
            .lock()
            .await
            .visited_endpoints
            .insert(url.to_string())
    }

    pub async fn push(&self, record: EndpointRecord) {
        self.inner.lock().await.results.push(record);
    }

    pub async fn records(&self) -> Vec<EndpointRecord> {
        self.inner.lock().await.results.clone()
    }

    pub async fn visited_endpoint_count(&self) -> usize {
        self.inner.lock().await.visited_endpoints.len()
    }
}

/// Outcome of [`ProbeTasks::drain`]. Tasks reaped earlier are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub abandoned: usize,
}

/// Background probe tasks. The orchestrator owns the set and joins it
/// before the run ends.
#[derive(Clone, Default)]
pub struct ProbeTasks {
    tasks: Arc<StdMutex<JoinSet<()>>>,
}

impl ProbeTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reaps finished tasks so the set only holds work still in flight.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.tasks.lock() {
            Ok(mut tasks) => {
                while let Some(finished) = tasks.try_join_next() {
                    if let Err(e) = finished {
                        warn!("Probe task failed: {}", e);
                    }
                }
                tasks.spawn(task);
            }
            Err(_) => warn!("Probe task set poisoned, probe dropped"),
        }
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// Joins outstanding probes until `timeout` elapses, then aborts the rest.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        let mut tasks = match self.tasks.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return DrainReport::default(),
        };

        let mut report = DrainReport::default();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(()))) => report.completed += 1,
                Ok(Some(Err(e))) => {
                    warn!("Probe task failed: {}", e);
                    report.completed += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    report.abandoned = tasks.len();
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }
        report
    }
}

/// Watches one page's event stream at a time; cloned handles share all state.
#[derive(Clone)]
pub struct NetworkMonitor {
    classifier: Arc<EndpointClassifier>,
    prober: Arc<dyn Probe>,
    state: DiscoveryState,
    probes: ProbeTasks,
    found: Arc<AtomicUsize>,
}

impl NetworkMonitor {
    pub fn new(
        classifier: EndpointClassifier,
        prober: Arc<dyn Probe>,
        state: DiscoveryState,
        probes: ProbeTasks,
    ) -> Self {
        Self {
            classifier: Arc::new(classifier),
            prober,
            state,
            probes,
            found: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Pumps `events` until the page's sender goes away or the handle is aborted.
    pub fn attach(&self, mut events: mpsc::UnboundedReceiver<PageEvent>) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                monitor.handle_event(event).await;
            }
            debug!("Page event stream closed");
        })
    }

    pub async fn handle_event(&self, event: PageEvent) {
        match event {
            PageEvent::Request { url, method } => self.on_request(&url, &method),
            PageEvent::Response {
                url,
                method,
                status,
            } => {
                self.on_response(&url, &method, status).await;
            }
            PageEvent::Console { text } => {
                self.on_diagnostic_line(&text).await;
            }
        }
    }

    pub fn on_request(&self, url: &str, method: &str) {
        debug!("→ {} {}", method, url);
    }

    /// Returns `true` when the response introduced a new endpoint.
    pub async fn on_response(&self, url: &str, method: &str, status: u16) -> bool {
        debug!("← {} {} {}", status, method, url);
        self.discover(url, method, EndpointSource::Response).await
    }

    /// Secondary path for calls announced by the request hook.
    pub async fn on_diagnostic_line(&self, text: &str) -> bool {
        let Some(captures) = DIAGNOSTIC_LINE.captures(text) else {
            return false;
        };
        let method = captures[1].to_uppercase();
        let url = captures[2].to_string();
        self.discover(&url, &method, EndpointSource::Console).await
    }

    /// Reads and resets the count of endpoints found since the previous call.
    pub fn endpoints_found_since_last_check(&self) -> usize {
        self.found.swap(0, Ordering::Relaxed)
    }

    pub fn state(&self) -> &DiscoveryState {
        &self.state
    }

    async fn discover(&self, url: &str, method: &str, source: EndpointSource) -> bool {
        if !self.classifier.is_candidate(url) || !self.state.claim_endpoint(url).await {
            return false;
        }

        self.found.fetch_add(1, Ordering::Relaxed);
        info!("Endpoint found ({}): {} {}", source.as_str(), method, url);

        let prober = self.prober.clone();
        let state = self.state.clone();
        let url = url.to_string();
        let method = method.to_string();
        self.probes.spawn(async move {
            match prober.probe(&url, &method).await {
                Some(outcome) => {
                    let record = EndpointRecord::from_outcome(url, outcome, source);
                    debug!("Probed {}", record);
                    state.push(record).await;
                }
                None => debug!("No decisive probe result for {}", url),
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::EndpointPatterns;
    use crate::result::ProbeOutcome;
    use async_trait::async_trait;

    struct FixedProbe {
        calls: AtomicUsize,
        outcome: Option<ProbeOutcome>,
    }

    #[async_trait]
    impl Probe for FixedProbe {
        async fn probe(&self, _url: &str, hinted_method: &str) -> Option<ProbeOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone().map(|mut o| {
                o.method = hinted_method.to_string();
                o
            })
        }
    }

    fn monitor(outcome: Option<ProbeOutcome>) -> (NetworkMonitor, Arc<FixedProbe>, ProbeTasks) {
        let probe = Arc::new(FixedProbe {
            calls: AtomicUsize::new(0),
            outcome,
        });
        let classifier =
            EndpointClassifier::new("example.com", &EndpointPatterns::default()).unwrap();
        let tasks = ProbeTasks::new();
        let monitor = NetworkMonitor::new(
            classifier,
            probe.clone(),
            DiscoveryState::new(),
            tasks.clone(),
        );
        (monitor, probe, tasks)
    }

    fn ok_outcome() -> Option<ProbeOutcome> {
        Some(ProbeOutcome {
            method: "GET".to_string(),
            auth_required: false,
            status_code: 200,
        })
    }

    #[tokio::test]
    async fn test_response_for_endpoint_is_probed_once() {
        let (monitor, probe, tasks) = monitor(ok_outcome());
        assert!(monitor.on_response("https://example.com/api/users", "GET", 200).await);
        assert!(!monitor.on_response("https://example.com/api/users", "GET", 200).await);
        tasks.drain(Duration::from_secs(5)).await;

        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        let records = monitor.state().records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].url, "https://example.com/api/users");
        assert_eq!(records[0].source, EndpointSource::Response);
    }

    #[tokio::test]
    async fn test_non_endpoints_and_foreign_hosts_are_ignored() {
        let (monitor, probe, tasks) = monitor(ok_outcome());
        assert!(!monitor.on_response("https://example.com/about", "GET", 200).await);
        assert!(!monitor.on_response("https://evil.com/api/users", "GET", 200).await);
        tasks.drain(Duration::from_secs(5)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(monitor.state().visited_endpoint_count().await, 0);
    }

    #[tokio::test]
    async fn test_diagnostic_lines() {
        let (monitor, _probe, tasks) = monitor(ok_outcome());
        assert!(
            monitor
                .on_diagnostic_line("XHR: post https://example.com/ajax/save")
                .await
        );
        assert!(
            monitor
                .on_diagnostic_line("FETCH: GET https://api.example.com/v2/items")
                .await
        );
        assert!(!monitor.on_diagnostic_line("hello world").await);
        tasks.drain(Duration::from_secs(5)).await;

        let mut records = monitor.state().records().await;
        records.sort_by(|a, b| a.url.cmp(&b.url));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].url, "https://api.example.com/v2/items");
        assert_eq!(records[1].method, "POST");
        assert!(records.iter().all(|r| r.source == EndpointSource::Console));
    }

    #[tokio::test]
    async fn test_undecided_probe_leaves_no_record() {
        let (monitor, probe, tasks) = monitor(None);
        monitor.on_response("https://example.com/api/x", "GET", 405).await;
        let report = tasks.drain(Duration::from_secs(5)).await;
        assert_eq!(report.completed, 1);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert!(monitor.state().records().await.is_empty());
        assert_eq!(monitor.state().visited_endpoint_count().await, 1);
    }

    #[tokio::test]
    async fn test_counter_resets_on_read() {
        let (monitor, _probe, _tasks) = monitor(ok_outcome());
        monitor.on_response("https://example.com/api/a", "GET", 200).await;
        monitor.on_response("https://example.com/api/b", "GET", 200).await;
        assert_eq!(monitor.endpoints_found_since_last_check(), 2);
        assert_eq!(monitor.endpoints_found_since_last_check(), 0);
    }

    #[tokio::test]
    async fn test_attach_pumps_events() {
        let (monitor, _probe, tasks) = monitor(ok_outcome());
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = monitor.attach(rx);
        tx.send(PageEvent::Response {
            url: "https://example.com/data.json".to_string(),
            method: "GET".to_string(),
            status: 200,
        })
        .unwrap();
        drop(tx);
        pump.await.unwrap();
        tasks.drain(Duration::from_secs(5)).await;
        assert_eq!(monitor.state().records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_drain_abandons_slow_probes() {
        let tasks = ProbeTasks::new();
        tasks.spawn(async {});
        tasks.spawn(async { tokio::time::sleep(Duration::from_secs(60)).await });
        let report = tasks.drain(Duration::from_millis(100)).await;
        assert_eq!(
            report,
            DrainReport {
                completed: 1,
                abandoned: 1
            }
        );
        assert_eq!(tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_spawn_reaps_finished_tasks() {
        let tasks = ProbeTasks::new();
        for _ in 0..50 {
            tasks.spawn(async {});
        }
        assert_eq!(tasks.pending(), 50);

        tokio::time::sleep(Duration::from_millis(50)).await;
        tasks.spawn(async { tokio::time::sleep(Duration::from_secs(60)).await });

        assert_eq!(tasks.pending(), 1);
        let report = tasks.drain(Duration::from_millis(50)).await;
        assert_eq!(report.abandoned, 1);
    }
}
