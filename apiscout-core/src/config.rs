//! Run configuration: built-in defaults, an optional TOML file, then CLI flags.

use apiscout_scanner::classifier::EndpointPatterns;
use apiscout_scanner::driver::DEFAULT_USER_AGENT;
use apiscout_scanner::filter::{ScopeRules, parse_root_origin};
use apiscout_scanner::{CrawlLimits, CrawlSettings, ProbeSettings};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "apiscout.toml";
pub const DATABASE_FILE_NAME: &str = "apiscout.db";
pub const DEFAULT_CONFIG_DIR: &str = "~/.config/apiscout/";
pub const DEFAULT_OUTPUT_DIR: &str = "results";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("could not render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("unknown page driver '{0}' (expected 'http' or 'browser')")]
    UnknownDriver(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    #[default]
    Http,
    Browser,
}

impl FromStr for DriverKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" | "static" => Ok(DriverKind::Http),
            "browser" | "chromium" => Ok(DriverKind::Browser),
            other => Err(ConfigError::UnknownDriver(other.to_string())),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverKind::Http => write!(f, "http"),
            DriverKind::Browser => write!(f, "browser"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settle_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_idle_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_drain_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverKind>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accept: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSection {
    pub patterns: EndpointPatterns,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
}

/// Contents of `apiscout.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub crawl: CrawlSection,
    pub probe: ProbeSection,
    pub scope: ScopeRules,
    pub endpoints: EndpointSection,
    pub output: OutputSection,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// The file written by `apiscout init`: every rule list spelled out.
pub fn default_config_text() -> Result<String, ConfigError> {
    let config = FileConfig {
        crawl: CrawlSection {
            timeout_ms: Some(30_000),
            delay_ms: Some(1_000),
            settle_ms: Some(2_000),
            network_idle_ms: Some(5_000),
            probe_drain_secs: Some(30),
            driver: Some(DriverKind::Http),
            ..CrawlSection::default()
        },
        probe: ProbeSection {
            timeout_ms: Some(5_000),
            ..ProbeSection::default()
        },
        ..FileConfig::default()
    };
    let body = toml::to_string_pretty(&config)?;
    Ok(format!(
        "# apiscout configuration\n\
         # Command-line flags override these values.\n\
         # Set crawl.max_pages / crawl.max_depth to bound a run (unlimited when absent).\n\n{}",
        body
    ))
}

/// Values given on the command line. `None` defers to the file, then defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOverrides {
    pub max_pages: Option<usize>,
    pub max_depth: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub delay_ms: Option<u64>,
    pub driver: Option<DriverKind>,
    pub output_dir: Option<PathBuf>,
    pub database: Option<PathBuf>,
}

/// Fully resolved settings for one crawl.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target: String,
    pub limits: CrawlLimits,
    pub settings: CrawlSettings,
    pub probe: ProbeSettings,
    pub scope: ScopeRules,
    pub endpoint_patterns: EndpointPatterns,
    pub driver: DriverKind,
    pub output_dir: PathBuf,
    pub database: Option<PathBuf>,
}

impl RunConfig {
    pub fn resolve(
        target: &str,
        file: Option<FileConfig>,
        cli: CliOverrides,
    ) -> Result<Self, ConfigError> {
        let root = parse_root_origin(target).map_err(|e| ConfigError::InvalidTarget(e.to_string()))?;
        let file = file.unwrap_or_default();
        let crawl = &file.crawl;

        let defaults = CrawlLimits::default();
        let limits = CrawlLimits {
            max_pages: cli.max_pages.or(crawl.max_pages),
            max_depth: cli.max_depth.or(crawl.max_depth),
            timeout: cli
                .timeout_ms
                .or(crawl.timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            delay: cli
                .delay_ms
                .or(crawl.delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.delay),
        };

        let base = CrawlSettings::default();
        let settings = CrawlSettings {
            settle_delay: crawl
                .settle_ms
                .map(Duration::from_millis)
                .unwrap_or(base.settle_delay),
            network_idle_timeout: crawl
                .network_idle_ms
                .map(Duration::from_millis)
                .unwrap_or(base.network_idle_timeout),
            probe_drain_timeout: crawl
                .probe_drain_secs
                .map(Duration::from_secs)
                .unwrap_or(base.probe_drain_timeout),
            user_agent: crawl
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            ..base
        };

        let probe_defaults = ProbeSettings::default();
        let probe = ProbeSettings {
            timeout: file
                .probe
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(probe_defaults.timeout),
            user_agent: file
                .probe
                .user_agent
                .clone()
                .unwrap_or(probe_defaults.user_agent),
            accept: file.probe.accept.clone().unwrap_or(probe_defaults.accept),
            max_redirects: probe_defaults.max_redirects,
        };

        Ok(Self {
            target: root.to_string(),
            limits,
            settings,
            probe,
            driver: cli.driver.or(crawl.driver).unwrap_or_default(),
            output_dir: cli
                .output_dir
                .or(file.output.directory.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            database: cli.database.or(file.output.database.clone()),
            scope: file.scope,
            endpoint_patterns: file.endpoints.patterns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_kind_parsing() {
        assert_eq!("http".parse::<DriverKind>().unwrap(), DriverKind::Http);
        assert_eq!("Browser".parse::<DriverKind>().unwrap(), DriverKind::Browser);
        assert!(matches!(
            "lynx".parse::<DriverKind>(),
            Err(ConfigError::UnknownDriver(_))
        ));
    }

    #[test]
    fn test_default_config_text_round_trips() {
        let text = default_config_text().unwrap();
        let parsed = FileConfig::parse(&text).unwrap();
        assert_eq!(parsed.scope, ScopeRules::default());
        assert_eq!(parsed.endpoints.patterns, EndpointPatterns::default());
        assert_eq!(parsed.crawl.timeout_ms, Some(30_000));
        assert_eq!(parsed.crawl.max_pages, None);
    }
}
