//! Sink errors. Transient by nature: the forwarder logs and counts them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to build sink client: {0}")]
    Setup(String),

    #[error("connect to {host} failed: {reason}")]
    Connect { host: String, reason: String },

    #[error("request to {host} failed: {reason}")]
    Request { host: String, reason: String },

    #[error("sink rejected write with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
}
