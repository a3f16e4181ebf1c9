//! scrapeflow.toml configuration parser.
//!
//! ```toml
//! [[scrape_endpoints]]
//! category = "postgres"
//! port = 9187
//! interval = "15s"
//!
//! [discovery]
//! source = "file"
//! path = "/etc/scrapeflow/instances.json"
//!
//! [sink]
//! hosts = ["es-1"]
//! port = 9200
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub scrape_endpoints: Vec<ScrapeEndpoint>,
    #[serde(default)]
    pub fetch: FetchConfig,
    pub discovery: DiscoveryConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub forwarder: ForwarderConfig,
}

/// Per-category scrape settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeEndpoint {
    /// Directory host tag selecting the targets of this category.
    pub category: String,
    /// Metrics port, shared by every target of the category.
    pub port: u16,
    #[serde(deserialize_with = "de_duration", serialize_with = "ser_duration")]
    pub interval: Duration,
    #[serde(default = "default_true")]
    pub include: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(
        default = "default_fetch_timeout",
        deserialize_with = "de_duration",
        serialize_with = "ser_duration"
    )]
    pub timeout: Duration,
    /// Cap for the poll interval backoff after consecutive fetch failures.
    #[serde(
        default = "default_max_backoff",
        deserialize_with = "de_duration",
        serialize_with = "ser_duration"
    )]
    pub max_backoff: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: default_fetch_timeout(),
            max_backoff: default_max_backoff(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    File,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    pub source: DiscoverySource,
    pub path: Option<PathBuf>,
    pub url: Option<String>,
    /// Zero keeps the target list static for the process lifetime.
    #[serde(
        default,
        deserialize_with = "de_duration",
        serialize_with = "ser_duration"
    )]
    pub refresh_interval: Duration,
    #[serde(
        default = "default_fetch_timeout",
        deserialize_with = "de_duration",
        serialize_with = "ser_duration"
    )]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub hosts: Vec<String>,
    pub port: u16,
    #[serde(default)]
    pub https: bool,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(
        default = "default_write_timeout",
        deserialize_with = "de_duration",
        serialize_with = "ser_duration"
    )]
    pub write_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// Upper bound on concurrent in-flight sink writes.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Capacity of each writer lane's queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// How long a worker may block on a full lane before the result is dropped.
    #[serde(
        default = "default_submit_timeout",
        deserialize_with = "de_duration",
        serialize_with = "ser_duration"
    )]
    pub submit_timeout: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
            submit_timeout: default_submit_timeout(),
        }
    }
}

impl AgentConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Categories that are switched on.
    pub fn included_endpoints(&self) -> impl Iterator<Item = &ScrapeEndpoint> {
        self.scrape_endpoints.iter().filter(|e| e.include)
    }

    /// Check the rules that serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.scrape_endpoints.is_empty() {
            return Err(invalid("no scrape_endpoints configured"));
        }

        let mut seen = HashSet::new();
        for endpoint in &self.scrape_endpoints {
            if endpoint.category.trim().is_empty() {
                return Err(invalid("scrape endpoint category must not be empty"));
            }
            if !seen.insert(endpoint.category.as_str()) {
                return Err(invalid(format!(
                    "duplicate scrape endpoint category {:?}",
                    endpoint.category
                )));
            }
            if endpoint.port == 0 {
                return Err(invalid(format!(
                    "category {:?}: port must be non-zero",
                    endpoint.category
                )));
            }
            if endpoint.interval.is_zero() {
                return Err(invalid(format!(
                    "category {:?}: interval must be positive",
                    endpoint.category
                )));
            }
        }

        if self.fetch.timeout.is_zero() {
            return Err(invalid("fetch.timeout must be positive"));
        }

        match self.discovery.source {
            DiscoverySource::File if self.discovery.path.is_none() => {
                return Err(invalid("discovery.path is required for source = \"file\""));
            }
            DiscoverySource::Http if self.discovery.url.is_none() => {
                return Err(invalid("discovery.url is required for source = \"http\""));
            }
            _ => {}
        }

        if self.sink.hosts.is_empty() {
            return Err(invalid("sink.hosts must list at least one host"));
        }
        if self.sink.port == 0 {
            return Err(invalid("sink.port must be non-zero"));
        }
        if self.sink.index.is_empty() {
            return Err(invalid("sink.index must not be empty"));
        }

        if self.forwarder.concurrency == 0 {
            return Err(invalid("forwarder.concurrency must be at least 1"));
        }
        if self.forwarder.queue_capacity == 0 {
            return Err(invalid("forwarder.queue_capacity must be at least 1"));
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// Parse a duration string like "5s", "500ms", "1m" or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {raw:?}")))
}

fn ser_duration<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format!("{}ms", d.as_millis()))
}

fn default_true() -> bool {
    true
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(120)
}

fn default_index() -> String {
    "scrapeflow".to_string()
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_queue_capacity() -> usize {
    64
}

fn default_submit_timeout() -> Duration {
    Duration::from_millis(250)
}
