#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use scrapeflow_core::ScrapeResult;
use scrapeflow_forward::{Forwarder, ForwarderSettings, Sink, WriteFuture};

pub const CPU_USAGE: &str = "# HELP cpu_usage CPU usage ratio\n\
# TYPE cpu_usage gauge\n\
cpu_usage{host=\"a\"} 0.42\n";

/// Sink that keeps every result it was asked to write.
#[derive(Default)]
pub struct RecordingSink {
    results: Mutex<Vec<ScrapeResult>>,
}

impl RecordingSink {
    pub fn results(&self) -> Vec<ScrapeResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.results.lock().unwrap().len()
    }
}

impl Sink for RecordingSink {
    fn write<'a>(
        &'a self,
        _index: &'a str,
        _doc_id: &'a str,
        result: &'a ScrapeResult,
    ) -> WriteFuture<'a> {
        Box::pin(async move {
            self.results.lock().unwrap().push(result.clone());
            Ok(())
        })
    }
}

pub fn forwarder(sink: Arc<RecordingSink>) -> Forwarder {
    Forwarder::new(
        sink,
        ForwarderSettings {
            index: "test".to_string(),
            concurrency: 2,
            queue_capacity: 16,
            submit_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_secs(2),
        },
    )
}

/// A fake exporter serving `body` on `/metrics`. Counts requests.
pub struct FakeExporter {
    pub port: u16,
    hits: Arc<AtomicUsize>,
}

impl FakeExporter {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub async fn exporter(status: StatusCode, body: &'static str, delay: Duration) -> FakeExporter {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = axum::Router::new().route(
        "/metrics",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                (status, body)
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    FakeExporter { port, hits }
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually(within: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
