//! The storage sink contract.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use scrapeflow_core::ScrapeResult;
use sha2::{Digest, Sha256};

use crate::error::SinkError;

/// Boxed future returned by [`Sink::write`].
pub type WriteFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

/// Durable store for scrape results.
///
/// One call writes one document. A failed write must not be partially
/// applied.
pub trait Sink: Send + Sync {
    fn write<'a>(
        &'a self,
        index: &'a str,
        doc_id: &'a str,
        result: &'a ScrapeResult,
    ) -> WriteFuture<'a>;
}

impl<S: Sink + ?Sized> Sink for Arc<S> {
    fn write<'a>(
        &'a self,
        index: &'a str,
        doc_id: &'a str,
        result: &'a ScrapeResult,
    ) -> WriteFuture<'a> {
        (**self).write(index, doc_id, result)
    }
}

/// Stable document id of a result: hex SHA-256 over target id, collection
/// time and sequence, truncated to 32 characters.
pub fn document_id(result: &ScrapeResult) -> String {
    let mut hasher = Sha256::new();
    hasher.update(result.target_id.as_bytes());
    hasher.update([0]);
    hasher.update(result.collected_at_ms.to_be_bytes());
    hasher.update(result.sequence.to_be_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(32);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(target_id: &str, sequence: u64) -> ScrapeResult {
        ScrapeResult {
            target_id: target_id.to_string(),
            category: "node".to_string(),
            address: "a".to_string(),
            collected_at_ms: 1_000,
            sequence,
            families: Vec::new(),
        }
    }

    #[test]
    fn document_id_is_stable_and_distinct() {
        let a = document_id(&result("node-a", 1));
        assert_eq!(a.len(), 32);
        assert_eq!(a, document_id(&result("node-a", 1)));
        assert_ne!(a, document_id(&result("node-a", 2)));
        assert_ne!(a, document_id(&result("node-b", 1)));
    }
}
