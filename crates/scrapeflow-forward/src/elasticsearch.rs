//! Elasticsearch document sink.
//!
//! Each result is indexed with `PUT /{index}/_doc/{doc_id}` against one of
//! the configured hosts (round-robin). Plain HTTP or HTTPS via rustls with
//! the Mozilla root store; optional Basic auth.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HOST, USER_AGENT};
use http::{HeaderValue, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use scrapeflow_core::{ScrapeResult, SinkConfig};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use crate::error::SinkError;
use crate::sink::{Sink, WriteFuture};

/// Characters of a rejection body kept in [`SinkError::Rejected`].
const REJECTED_BODY_CHARS: usize = 256;

/// Connection parameters of the sink cluster.
#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub hosts: Vec<String>,
    pub port: u16,
    pub https: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl From<&SinkConfig> for SinkSettings {
    fn from(config: &SinkConfig) -> Self {
        Self {
            hosts: config.hosts.clone(),
            port: config.port,
            https: config.https,
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

/// Shared, immutable Elasticsearch client.
///
/// Built once at startup and shared by every forwarder lane.
pub struct ElasticsearchSink {
    hosts: Vec<String>,
    port: u16,
    authorization: Option<HeaderValue>,
    tls: Option<TlsConnector>,
    next_host: AtomicUsize,
}

impl ElasticsearchSink {
    /// Build the client. Fails without hosts or when TLS cannot be set up.
    pub fn new(settings: SinkSettings) -> Result<Self, SinkError> {
        if settings.hosts.is_empty() {
            return Err(SinkError::Setup("no sink hosts configured".to_string()));
        }

        let tls = if settings.https {
            Some(TlsConnector::from(Arc::new(client_config()?)))
        } else {
            None
        };

        let authorization = match &settings.username {
            Some(user) => {
                let password = settings.password.as_deref().unwrap_or_default();
                let token = STANDARD.encode(format!("{user}:{password}"));
                let value = HeaderValue::from_str(&format!("Basic {token}"))
                    .map_err(|e| SinkError::Setup(format!("invalid credentials: {e}")))?;
                Some(value)
            }
            None => None,
        };

        let sink = Self {
            hosts: settings.hosts,
            port: settings.port,
            authorization,
            tls,
            next_host: AtomicUsize::new(0),
        };
        info!(urls = ?sink.base_urls(), "elasticsearch sink configured");
        Ok(sink)
    }

    /// `scheme://host:port` of every configured host.
    pub fn base_urls(&self) -> Vec<String> {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        self.hosts
            .iter()
            .map(|h| format!("{scheme}://{h}:{}", self.port))
            .collect()
    }

    fn pick_host(&self) -> &str {
        let i = self.next_host.fetch_add(1, Ordering::Relaxed) % self.hosts.len();
        &self.hosts[i]
    }

    async fn put(&self, host: &str, path: &str, body: Bytes) -> Result<(), SinkError> {
        let stream = TcpStream::connect((host, self.port))
            .await
            .map_err(|e| SinkError::Connect {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        let mut builder = Request::put(path)
            .header(HOST, format!("{host}:{}", self.port))
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, "scrapeflow/0.1");
        if let Some(auth) = &self.authorization {
            builder = builder.header(AUTHORIZATION, auth.clone());
        }
        let request = builder.body(Full::new(body)).map_err(|e| SinkError::Request {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

        let (status, response_body) = match &self.tls {
            Some(connector) => {
                let server_name =
                    ServerName::try_from(host.to_string()).map_err(|e| SinkError::Connect {
                        host: host.to_string(),
                        reason: e.to_string(),
                    })?;
                let tls_stream = connector.connect(server_name, stream).await.map_err(|e| {
                    SinkError::Connect {
                        host: host.to_string(),
                        reason: format!("tls handshake: {e}"),
                    }
                })?;
                send(TokioIo::new(tls_stream), request, host).await?
            }
            None => send(TokioIo::new(stream), request, host).await?,
        };

        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::Rejected {
                status: status.as_u16(),
                body: excerpt(&response_body),
            })
        }
    }
}

impl Sink for ElasticsearchSink {
    fn write<'a>(
        &'a self,
        index: &'a str,
        doc_id: &'a str,
        result: &'a ScrapeResult,
    ) -> WriteFuture<'a> {
        Box::pin(async move {
            let body = Bytes::from(serde_json::to_vec(result)?);
            let host = self.pick_host();
            let path = format!("/{index}/_doc/{doc_id}");
            self.put(host, &path, body).await?;
            debug!(%host, %index, %doc_id, target_id = %result.target_id, "document indexed");
            Ok(())
        })
    }
}

/// One request over a fresh HTTP/1.1 connection.
async fn send<T>(
    io: TokioIo<T>,
    request: Request<Full<Bytes>>,
    host: &str,
) -> Result<(StatusCode, Bytes), SinkError>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let request_error = |e: hyper::Error| SinkError::Request {
        host: host.to_string(),
        reason: e.to_string(),
    };

    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(request_error)?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let response = sender.send_request(request).await.map_err(request_error)?;
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map(|b| b.to_bytes())
        .unwrap_or_default();
    Ok((status, body))
}

/// The start of a response body, cut on a character boundary.
fn excerpt(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(REJECTED_BODY_CHARS)
        .collect()
}

fn client_config() -> Result<rustls::ClientConfig, SinkError> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .map_err(|e| SinkError::Setup(format!("tls protocol version error: {e}")))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(config)
}
