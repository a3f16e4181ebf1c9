//! Discovery errors. Any of these at startup is fatal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("directory unreachable: {0}")]
    Unreachable(String),

    #[error("directory returned HTTP {0}")]
    Status(u16),

    #[error("directory query timed out")]
    Timeout,

    #[error("failed to decode directory records: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid directory url: {0}")]
    InvalidUrl(String),
}
