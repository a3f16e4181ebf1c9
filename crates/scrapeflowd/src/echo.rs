//! `--debug` result dump.

use scrapeflow_core::ScrapeResult;
use scrapeflow_forward::{Sink, WriteFuture};
use tracing::warn;

/// Prints each result as one JSON line on stdout, then writes it to the
/// wrapped sink.
pub struct EchoSink<S> {
    inner: S,
}

impl<S> EchoSink<S> {
    /// Wrap `inner`.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: Sink> Sink for EchoSink<S> {
    fn write<'a>(
        &'a self,
        index: &'a str,
        doc_id: &'a str,
        result: &'a ScrapeResult,
    ) -> WriteFuture<'a> {
        match serde_json::to_string(result) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(target_id = %result.target_id, error = %e, "cannot render result"),
        }
        self.inner.write(index, doc_id, result)
    }
}
