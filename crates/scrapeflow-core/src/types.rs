//! Domain types shared by every scrapeflow stage.
//!
//! All result types are serializable to JSON; a [`ScrapeResult`] is the
//! document body written to the sink.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Stable identity of a scrape target: `"{category}-{address}"`.
pub type TargetId = String;

/// Label set of a single sample (label name → label value).
pub type Labels = BTreeMap<String, String>;

// ── Target ─────────────────────────────────────────────────────────

/// One metrics endpoint to poll.
///
/// Built once from a directory snapshot and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScrapeTarget {
    pub id: TargetId,
    /// Directory host tag this target was selected by.
    pub category: String,
    pub address: String,
    pub port: u16,
}

impl ScrapeTarget {
    /// Create a target with the canonical `{category}-{address}` id.
    pub fn new(category: &str, address: &str, port: u16) -> Self {
        Self {
            id: format!("{category}-{address}"),
            category: category.to_string(),
            address: address.to_string(),
            port,
        }
    }

    /// The exposition endpoint of this target. IPv6 addresses are
    /// bracketed.
    pub fn metrics_url(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("http://[{}]:{}/metrics", self.address, self.port)
        } else {
            format!("http://{}:{}/metrics", self.address, self.port)
        }
    }
}

impl fmt::Display for ScrapeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.id, self.address, self.port)
    }
}

// ── Metric families ────────────────────────────────────────────────

/// Measurement kind of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
    #[default]
    Untyped,
}

impl MetricKind {
    /// Lowercase `# TYPE` keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
            MetricKind::Untyped => "untyped",
        }
    }
}

impl FromStr for MetricKind {
    type Err = String;

    /// Parse the keyword of a `# TYPE` line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            "histogram" => Ok(MetricKind::Histogram),
            "summary" => Ok(MetricKind::Summary),
            "untyped" | "unknown" => Ok(MetricKind::Untyped),
            other => Err(format!("unknown metric type {other:?}")),
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One labeled measurement within a family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub labels: Labels,
    pub value: f64,
    /// Milliseconds since the Unix epoch. Filled with the collection time
    /// during aggregation when the exposition carries none.
    pub timestamp_ms: Option<i64>,
}

/// A named group of samples sharing one kind.
///
/// `samples` keeps exposition order and is empty (never absent) when the
/// family exposed no series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFamily {
    pub name: String,
    pub kind: MetricKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    /// Create an empty family.
    pub fn new(name: &str, kind: MetricKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            help: None,
            samples: Vec::new(),
        }
    }
}

// ── Results ────────────────────────────────────────────────────────

/// The outcome of one successful fetch + aggregate cycle.
///
/// Immutable once produced; ownership moves to the forwarder on submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub target_id: TargetId,
    pub category: String,
    pub address: String,
    pub collected_at_ms: i64,
    /// Per-target production order, starting at 1.
    pub sequence: u64,
    pub families: Vec<MetricFamily>,
}

impl ScrapeResult {
    /// Total number of samples across all families.
    pub fn sample_count(&self) -> usize {
        self.families.iter().map(|f| f.samples.len()).sum()
    }

    /// The family called `name`, if present.
    pub fn family(&self, name: &str) -> Option<&MetricFamily> {
        self.families.iter().find(|f| f.name == name)
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
