//! Directory collaborators.
//!
//! A [`Directory`] answers "which service instances have a host tagged
//! with this category". Implementations only need to narrow down to the
//! instances; per-host filtering happens in [`crate::discover`].

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;
use url::Url;

use crate::error::DiscoveryError;
use crate::model::ServiceInstance;

/// Boxed future returned by [`Directory::query`].
pub type QueryFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<ServiceInstance>, DiscoveryError>> + Send + 'a>>;

/// Source of service instance records.
pub trait Directory: Send + Sync {
    /// Instances with at least one host tagged `category`.
    ///
    /// An empty result means the directory is reachable but has nothing
    /// for this category; unreachable directories return an error.
    fn query<'a>(&'a self, category: &'a str) -> QueryFuture<'a>;
}

impl<D: Directory + ?Sized> Directory for Arc<D> {
    fn query<'a>(&'a self, category: &'a str) -> QueryFuture<'a> {
        (**self).query(category)
    }
}

// ── File ───────────────────────────────────────────────────────────

/// Reads a JSON array of instance records from disk on every query.
#[derive(Debug, Clone)]
pub struct FileDirectory {
    path: PathBuf,
}

impl FileDirectory {
    /// Read instances from the JSON file at `path` on every query.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Directory for FileDirectory {
    fn query<'a>(&'a self, category: &'a str) -> QueryFuture<'a> {
        Box::pin(async move {
            let content = tokio::fs::read(&self.path).await.map_err(|e| {
                DiscoveryError::Unreachable(format!("{}: {e}", self.path.display()))
            })?;
            let instances: Vec<ServiceInstance> = serde_json::from_slice(&content)?;
            debug!(path = %self.path.display(), records = instances.len(), "directory file loaded");
            Ok(instances
                .into_iter()
                .filter(|i| i.has_category(category))
                .collect())
        })
    }
}

// ── HTTP ───────────────────────────────────────────────────────────

/// Queries `GET {url}?type={category}`, expecting a JSON array of records.
///
/// The server is trusted to do the category selection; results are
/// filtered again locally so a lax server cannot widen the target set.
#[derive(Clone)]
pub struct HttpDirectory {
    url: String,
    timeout: Duration,
    client: Client<HttpConnector, Empty<Bytes>>,
}

impl HttpDirectory {
    /// Query `url`, bounding each request by `timeout`.
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            timeout,
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    /// The directory URL with `type={category}` appended to its query.
    fn query_uri(&self, category: &str) -> Result<http::Uri, DiscoveryError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| DiscoveryError::InvalidUrl(format!("{}: {e}", self.url)))?;
        url.query_pairs_mut().append_pair("type", category);
        url.as_str()
            .parse::<http::Uri>()
            .map_err(|e| DiscoveryError::InvalidUrl(format!("{url}: {e}")))
    }
}

impl Directory for HttpDirectory {
    fn query<'a>(&'a self, category: &'a str) -> QueryFuture<'a> {
        Box::pin(async move {
            let uri = self.query_uri(category)?;
            let request = http::Request::get(uri.clone())
                .header("accept", "application/json")
                .header("user-agent", "scrapeflow/0.1")
                .body(Empty::<Bytes>::new())
                .map_err(|e| DiscoveryError::InvalidUrl(e.to_string()))?;

            let body = tokio::time::timeout(self.timeout, async {
                let response = self
                    .client
                    .request(request)
                    .await
                    .map_err(|e| DiscoveryError::Unreachable(format!("{uri}: {e}")))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(DiscoveryError::Status(status.as_u16()));
                }
                response
                    .into_body()
                    .collect()
                    .await
                    .map(|b| b.to_bytes())
                    .map_err(|e| DiscoveryError::Unreachable(format!("{uri}: {e}")))
            })
            .await
            .map_err(|_| DiscoveryError::Timeout)??;

            let instances: Vec<ServiceInstance> = serde_json::from_slice(&body)?;
            debug!(%uri, records = instances.len(), "directory queried");
            Ok(instances
                .into_iter()
                .filter(|i| i.has_category(category))
                .collect())
        })
    }
}

// ── In-memory ──────────────────────────────────────────────────────

/// Fixed record set; useful for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    instances: Vec<ServiceInstance>,
}

impl MemoryDirectory {
    /// Serve a fixed set of instances.
    pub fn new(instances: Vec<ServiceInstance>) -> Self {
        Self { instances }
    }
}

impl Directory for MemoryDirectory {
    fn query<'a>(&'a self, category: &'a str) -> QueryFuture<'a> {
        let matching = self
            .instances
            .iter()
            .filter(|i| i.has_category(category))
            .cloned()
            .collect();
        Box::pin(async move { Ok(matching) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServerAddress;

    fn instance(id: &str, hosts: &[(&str, &str)]) -> ServiceInstance {
        ServiceInstance {
            id: id.to_string(),
            hosts: hosts
                .iter()
                .map(|(ip, kind)| ServerAddress {
                    ip: ip.to_string(),
                    kind: kind.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn file_directory_filters_by_category() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.json");
        let records = vec![
            instance("a", &[("10.0.0.1", "postgres")]),
            instance("b", &[("10.0.0.2", "redis")]),
        ];
        std::fs::write(&path, serde_json::to_vec(&records).unwrap()).unwrap();

        let directory = FileDirectory::new(&path);
        let found = directory.query("postgres").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");
    }

    #[tokio::test]
    async fn file_directory_missing_file_is_unreachable() {
        let directory = FileDirectory::new("/nonexistent/instances.json");
        let err = directory.query("postgres").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Unreachable(_)));
    }

    #[tokio::test]
    async fn file_directory_garbage_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instances.json");
        std::fs::write(&path, b"not json").unwrap();
        let err = FileDirectory::new(&path).query("postgres").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Decode(_)));
    }

    #[tokio::test]
    async fn http_directory_queries_by_type() {
        use axum::extract::Query;
        use axum::routing::get;
        use std::collections::HashMap;

        let app = axum::Router::new().route(
            "/instances",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let kind = params.get("type").cloned().unwrap_or_default();
                axum::Json(vec![
                    instance("a", &[("10.0.0.1", kind.as_str())]),
                    instance("b", &[("10.0.0.2", "other")]),
                ])
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let directory = HttpDirectory::new(&format!("http://{addr}/instances"), Duration::from_secs(2));
        let found = directory.query("postgres").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].hosts[0].kind, "postgres");
    }

    #[tokio::test]
    async fn http_directory_non_2xx_is_error() {
        use axum::http::StatusCode;
        use axum::routing::get;

        let app = axum::Router::new().route(
            "/instances",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let directory = HttpDirectory::new(&format!("http://{addr}/instances"), Duration::from_secs(2));
        let err = directory.query("postgres").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Status(503)));
    }

    #[tokio::test]
    async fn http_directory_closed_port_is_unreachable() {
        let directory = HttpDirectory::new("http://127.0.0.1:1/instances", Duration::from_secs(2));
        let err = directory.query("postgres").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Unreachable(_)));
    }

    #[test]
    fn category_is_appended_to_existing_query() {
        let directory = HttpDirectory::new("http://dir:8080/instances?region=eu", Duration::from_secs(1));
        let uri = directory.query_uri("a b&c").unwrap();
        assert_eq!(uri.path(), "/instances");
        assert_eq!(uri.query(), Some("region=eu&type=a+b%26c"));

        let directory = HttpDirectory::new("not a url", Duration::from_secs(1));
        assert!(matches!(
            directory.query_uri("postgres"),
            Err(DiscoveryError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn http_directory_sends_reserved_characters_intact() {
        use axum::extract::Query;
        use axum::routing::get;
        use std::collections::HashMap;

        let app = axum::Router::new().route(
            "/instances",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let kind = params.get("type").cloned().unwrap_or_default();
                axum::Json(vec![instance("a", &[("10.0.0.1", kind.as_str())])])
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let directory = HttpDirectory::new(&format!("http://{addr}/instances"), Duration::from_secs(2));
        let found = directory.query("pg main&replica").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].hosts[0].kind, "pg main&replica");
    }
}
