//! scrapeflow-forward — hands scrape results to the durable store.
//!
//! # Architecture
//!
//! ```text
//! Poll workers ──Submitter::submit()──► lane[hash(target_id) % N] (bounded queue)
//!                                          └── one writer task per lane ──► Sink::write()
//! ```
//!
//! - N lanes bound the number of concurrent sink writes to N.
//! - A target always maps to the same lane, so its results are written in
//!   the order they were produced.
//! - A full lane blocks the submitting worker for at most `submit_timeout`;
//!   after that the newest result is dropped and counted.
//! - Write failures are logged and counted; they never reach the worker.

pub mod elasticsearch;
pub mod error;
pub mod forwarder;
pub mod sink;

pub use elasticsearch::{ElasticsearchSink, SinkSettings};
pub use error::SinkError;
pub use forwarder::{Forwarder, ForwarderSettings, ForwarderStats, StatsSnapshot, SubmitOutcome, Submitter};
pub use sink::{Sink, WriteFuture, document_id};
