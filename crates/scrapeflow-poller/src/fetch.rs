//! `/metrics` fetching.
//!
//! One [`HttpFetcher`] is built at startup and cloned into every worker;
//! clones share the same connection pool.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Limited};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use scrapeflow_core::ScrapeTarget;
use tracing::debug;

use crate::error::FetchError;

/// Largest `/metrics` body accepted by default.
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Shared HTTP client for `/metrics` endpoints.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client<HttpConnector, Empty<Bytes>>,
    timeout: Duration,
    max_body_bytes: usize,
}

impl HttpFetcher {
    /// Create a fetcher whose connect and overall timeouts are `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));
        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
            timeout,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Cap the accepted body size. Larger bodies fail with [`FetchError::Body`].
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Timeout applied to each fetch.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Body size limit applied to each fetch.
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// `GET http://{address}:{port}/metrics`, returning the body text.
    ///
    /// The whole exchange, body included, is bounded by the fetch timeout,
    /// and the body by the size limit. Any non-2xx status is an error.
    pub async fn fetch(&self, target: &ScrapeTarget) -> Result<String, FetchError> {
        let url = target.metrics_url();
        let uri = url
            .parse::<http::Uri>()
            .map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;
        let request = http::Request::get(uri)
            .header("accept", "text/plain")
            .header("user-agent", "scrapeflow/0.1")
            .body(Empty::<Bytes>::new())
            .map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;

        let body = tokio::time::timeout(self.timeout, async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| FetchError::Unreachable {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    url: url.clone(),
                    status: status.as_u16(),
                });
            }

            Limited::new(response.into_body(), self.max_body_bytes)
                .collect()
                .await
                .map(|b| b.to_bytes())
                .map_err(|e| FetchError::Body {
                    url: url.clone(),
                    reason: e.to_string(),
                })
        })
        .await
        .map_err(|_| FetchError::Timeout {
            url: url.clone(),
            timeout: self.timeout,
        })??;

        debug!(target_id = %target.id, bytes = body.len(), "metrics fetched");
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}
