//! scrapeflow-core — shared types and configuration for scrapeflow.
//!
//! Everything the pipeline passes between stages lives here:
//!
//! ```text
//! ScrapeTarget ──(fetch)──► MetricFamily/Sample ──► ScrapeResult ──► sink
//! ```
//!
//! The configuration file (`scrapeflow.toml`) is parsed and validated by
//! [`AgentConfig::from_file`].

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AgentConfig, DiscoveryConfig, DiscoverySource, FetchConfig, ForwarderConfig, ScrapeEndpoint,
    SinkConfig, parse_duration,
};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
