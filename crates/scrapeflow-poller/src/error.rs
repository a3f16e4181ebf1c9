use std::time::Duration;

use thiserror::Error;

/// A single failed `/metrics` fetch. Never fatal to the worker.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid metrics url {0}")]
    InvalidUrl(String),

    #[error("{url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("{url}: no response within {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("{url}: unexpected status {status}")]
    Status { url: String, status: u16 },

    #[error("{url}: reading body: {reason}")]
    Body { url: String, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("target {target_id}: poll interval must be positive")]
    ZeroInterval { target_id: String },
}
