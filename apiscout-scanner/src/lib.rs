pub mod classifier;
pub mod crawler;
pub mod driver;
pub mod error;
pub mod filter;
pub mod interaction;
pub mod links;
pub mod monitor;
pub mod prober;
pub mod result;

pub use classifier::{EndpointClassifier, EndpointPatterns};
pub use crawler::{
    CrawlLimits, CrawlOutput, CrawlProgress, CrawlSettings, Crawler, ProgressCallback,
    ReportWriter, RunState,
};
pub use driver::{HttpPageDriver, Page, PageDriver, PageEvent};
pub use error::ScanError;
pub use filter::{ScopeRules, UrlFilter, is_admissible, normalize_url};
pub use interaction::{FormInteractor, FormRecord, InteractionAgent};
pub use monitor::{DiscoveryState, NetworkMonitor, ProbeTasks};
pub use prober::{EndpointProber, Probe, ProbeSettings};
pub use result::{AuthCategory, EndpointRecord, EndpointSource, EndpointSummary, ProbeOutcome};

#[cfg(feature = "browser")]
pub use driver::ChromiumPageDriver;
