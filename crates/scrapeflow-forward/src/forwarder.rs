//! Bounded, per-target ordered forwarding.
//!
//! The forwarder owns `concurrency` lanes. Each lane is a bounded queue
//! drained by a single writer task, so at most `concurrency` sink writes
//! are in flight at any time. Results are routed to a lane by their
//! target id; a target's results therefore reach the sink in submission
//! order even though different targets are written concurrently.
//!
//! Overflow policy: when a lane is full, [`Submitter::submit`] waits up to
//! `submit_timeout` for space and then drops the *newest* result (the one
//! being submitted), incrementing the `dropped` counter.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use scrapeflow_core::ScrapeResult;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sink::{Sink, document_id};

/// Forwarder tuning.
#[derive(Debug, Clone)]
pub struct ForwarderSettings {
    /// Index (collection) every document is written to.
    pub index: String,
    /// Number of lanes, i.e. the bound on concurrent sink writes.
    pub concurrency: usize,
    pub queue_capacity: usize,
    pub submit_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self {
            index: "scrapeflow".to_string(),
            concurrency: 4,
            queue_capacity: 64,
            submit_timeout: Duration::from_millis(250),
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a single submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// The lane stayed full for the whole submit timeout.
    Dropped,
}

/// Forwarding counters, shared by all lanes and submitters.
#[derive(Debug, Default)]
pub struct ForwarderStats {
    submitted: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

/// Point-in-time copy of [`ForwarderStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub written: u64,
    pub failed: u64,
    pub dropped: u64,
    pub in_flight: u64,
    pub peak_in_flight: u64,
}

impl ForwarderStats {
    /// Read every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            peak_in_flight: self.peak_in_flight.load(Ordering::Relaxed),
        }
    }

    fn begin_write(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
    }

    fn end_write(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Cloneable entry point used by poll workers.
///
/// Holds the only senders of the lane queues: once every `Submitter` is
/// dropped the lanes drain and stop, so nothing can be submitted to a
/// closed forwarder.
#[derive(Clone)]
pub struct Submitter {
    lanes: Arc<[mpsc::Sender<ScrapeResult>]>,
    submit_timeout: Duration,
    stats: Arc<ForwarderStats>,
}

impl Submitter {
    /// Queue a result for writing. Never waits for the write itself.
    pub async fn submit(&self, result: ScrapeResult) -> SubmitOutcome {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        let lane = lane_for(&result.target_id, self.lanes.len());
        let sender = &self.lanes[lane];

        let rejected = match sender.try_send(result) {
            Ok(()) => return SubmitOutcome::Queued,
            Err(TrySendError::Full(result)) => {
                match sender.send_timeout(result, self.submit_timeout).await {
                    Ok(()) => return SubmitOutcome::Queued,
                    Err(SendTimeoutError::Timeout(result)) | Err(SendTimeoutError::Closed(result)) => result,
                }
            }
            Err(TrySendError::Closed(result)) => result,
        };

        let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            target_id = %rejected.target_id,
            sequence = rejected.sequence,
            lane,
            dropped_total = dropped,
            "forwarder lane full, dropping result"
        );
        SubmitOutcome::Dropped
    }
}

/// Owns the lane writer tasks.
pub struct Forwarder {
    submitter: Submitter,
    lanes: Vec<JoinHandle<()>>,
    stats: Arc<ForwarderStats>,
}

impl Forwarder {
    /// Spawn the lane writers. Must be called inside a tokio runtime.
    pub fn new<S>(sink: Arc<S>, settings: ForwarderSettings) -> Self
    where
        S: Sink + ?Sized + 'static,
    {
        let concurrency = settings.concurrency.max(1);
        let capacity = settings.queue_capacity.max(1);
        let stats = Arc::new(ForwarderStats::default());
        let index: Arc<str> = Arc::from(settings.index.as_str());

        let mut senders = Vec::with_capacity(concurrency);
        let mut lanes = Vec::with_capacity(concurrency);
        for lane in 0..concurrency {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(tx);
            lanes.push(tokio::spawn(run_lane(
                lane,
                rx,
                sink.clone(),
                index.clone(),
                settings.write_timeout,
                stats.clone(),
            )));
        }

        info!(
            lanes = concurrency,
            queue_capacity = capacity,
            index = %settings.index,
            "forwarder started"
        );

        Self {
            submitter: Submitter {
                lanes: senders.into(),
                submit_timeout: settings.submit_timeout,
                stats: stats.clone(),
            },
            lanes,
            stats,
        }
    }

    /// A new handle for submitting results.
    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    /// Live counters, readable while the forwarder runs.
    pub fn stats(&self) -> Arc<ForwarderStats> {
        self.stats.clone()
    }

    /// Stop accepting work and wait until every queued result is written.
    ///
    /// Completes only after all outstanding [`Submitter`] clones are dropped.
    pub async fn close(self) -> StatsSnapshot {
        let Forwarder {
            submitter,
            lanes,
            stats,
        } = self;
        drop(submitter);

        for lane in lanes {
            if let Err(e) = lane.await {
                warn!(error = %e, "forwarder lane panicked");
            }
        }

        let snapshot = stats.snapshot();
        info!(
            written = snapshot.written,
            failed = snapshot.failed,
            dropped = snapshot.dropped,
            "forwarder closed"
        );
        snapshot
    }
}

async fn run_lane<S>(
    lane: usize,
    mut rx: mpsc::Receiver<ScrapeResult>,
    sink: Arc<S>,
    index: Arc<str>,
    write_timeout: Duration,
    stats: Arc<ForwarderStats>,
) where
    S: Sink + ?Sized,
{
    debug!(lane, "forwarder lane started");

    while let Some(result) = rx.recv().await {
        let doc_id = document_id(&result);
        stats.begin_write();
        let outcome = tokio::time::timeout(write_timeout, sink.write(&index, &doc_id, &result)).await;
        stats.end_write();

        match outcome {
            Ok(Ok(())) => {
                stats.written.fetch_add(1, Ordering::Relaxed);
                debug!(
                    lane,
                    target_id = %result.target_id,
                    sequence = result.sequence,
                    %doc_id,
                    "result forwarded"
                );
            }
            Ok(Err(e)) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    lane,
                    target_id = %result.target_id,
                    %doc_id,
                    error = %e,
                    "sink write failed"
                );
            }
            Err(_) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    lane,
                    target_id = %result.target_id,
                    %doc_id,
                    timeout = ?write_timeout,
                    "sink write timed out"
                );
            }
        }
    }

    debug!(lane, "forwarder lane drained");
}

fn lane_for(target_id: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    target_id.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use tokio::sync::watch;

    use crate::error::SinkError;
    use crate::sink::WriteFuture;

    fn result(target_id: &str, sequence: u64) -> ScrapeResult {
        ScrapeResult {
            target_id: target_id.to_string(),
            category: "node".to_string(),
            address: target_id.to_string(),
            collected_at_ms: sequence as i64,
            sequence,
            families: Vec::new(),
        }
    }

    fn settings(concurrency: usize, queue_capacity: usize) -> ForwarderSettings {
        ForwarderSettings {
            index: "test".to_string(),
            concurrency,
            queue_capacity,
            submit_timeout: Duration::from_millis(20),
            write_timeout: Duration::from_secs(5),
        }
    }

    /// Records writes, optionally sleeping per write and tracking how many
    /// writes overlap.
    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<(String, u64)>>,
        delay: Duration,
        active: AtomicU64,
        max_active: AtomicU64,
    }

    impl RecordingSink {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn per_target(&self) -> HashMap<String, Vec<u64>> {
            let mut map: HashMap<String, Vec<u64>> = HashMap::new();
            for (target, seq) in self.writes.lock().unwrap().iter() {
                map.entry(target.clone()).or_default().push(*seq);
            }
            map
        }
    }

    impl Sink for RecordingSink {
        fn write<'a>(
            &'a self,
            index: &'a str,
            _doc_id: &'a str,
            result: &'a ScrapeResult,
        ) -> WriteFuture<'a> {
            Box::pin(async move {
                assert_eq!(index, "test");
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_active.fetch_max(now, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.writes
                    .lock()
                    .unwrap()
                    .push((result.target_id.clone(), result.sequence));
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    /// Blocks every write until the gate opens.
    struct GatedSink {
        gate: watch::Receiver<bool>,
        started: AtomicU64,
        writes: Mutex<Vec<u64>>,
    }

    impl Sink for GatedSink {
        fn write<'a>(
            &'a self,
            _index: &'a str,
            _doc_id: &'a str,
            result: &'a ScrapeResult,
        ) -> WriteFuture<'a> {
            Box::pin(async move {
                self.started.fetch_add(1, Ordering::SeqCst);
                let mut gate = self.gate.clone();
                let _ = gate.wait_for(|open| *open).await;
                self.writes.lock().unwrap().push(result.sequence);
                Ok(())
            })
        }
    }

    struct FailingSink;

    impl Sink for FailingSink {
        fn write<'a>(
            &'a self,
            _index: &'a str,
            _doc_id: &'a str,
            _result: &'a ScrapeResult,
        ) -> WriteFuture<'a> {
            Box::pin(async {
                Err(SinkError::Rejected {
                    status: 503,
                    body: "unavailable".to_string(),
                })
            })
        }
    }

    #[tokio::test]
    async fn close_drains_every_queued_result() {
        let sink = Arc::new(RecordingSink::default());
        let forwarder = Forwarder::new(sink.clone(), settings(2, 16));
        let submitter = forwarder.submitter();

        for seq in 1..=10 {
            assert_eq!(submitter.submit(result("node-a", seq)).await, SubmitOutcome::Queued);
        }
        drop(submitter);

        let stats = forwarder.close().await;
        assert_eq!(stats.submitted, 10);
        assert_eq!(stats.written, 10);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(sink.writes.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn per_target_order_is_preserved_across_lanes() {
        let sink = Arc::new(RecordingSink::with_delay(Duration::from_millis(1)));
        let forwarder = Forwarder::new(sink.clone(), settings(4, 256));

        let mut producers = Vec::new();
        for t in 0..6 {
            let submitter = forwarder.submitter();
            producers.push(tokio::spawn(async move {
                for seq in 1..=20 {
                    submitter.submit(result(&format!("node-{t}"), seq)).await;
                }
            }));
        }
        for p in producers {
            p.await.unwrap();
        }
        forwarder.close().await;

        let per_target = sink.per_target();
        assert_eq!(per_target.len(), 6);
        for (target, seqs) in per_target {
            assert_eq!(seqs, (1..=20).collect::<Vec<_>>(), "order broken for {target}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_writes_never_exceed_concurrency() {
        let sink = Arc::new(RecordingSink::with_delay(Duration::from_millis(5)));
        let forwarder = Forwarder::new(sink.clone(), settings(3, 256));
        let stats = forwarder.stats();
        let submitter = forwarder.submitter();

        for seq in 1..=10 {
            for t in 0..20 {
                submitter.submit(result(&format!("node-{t}"), seq)).await;
            }
        }
        drop(submitter);
        let snapshot = forwarder.close().await;

        assert_eq!(snapshot.written, 200);
        assert!(sink.max_active.load(Ordering::SeqCst) <= 3);
        assert!(stats.snapshot().peak_in_flight <= 3);
        assert!(snapshot.peak_in_flight >= 1);
    }

    #[tokio::test]
    async fn full_lane_drops_newest_after_bounded_wait() {
        let (open_tx, open_rx) = watch::channel(false);
        let sink = Arc::new(GatedSink {
            gate: open_rx,
            started: AtomicU64::new(0),
            writes: Mutex::new(Vec::new()),
        });
        let forwarder = Forwarder::new(sink.clone(), settings(1, 1));
        let submitter = forwarder.submitter();

        // First result is picked up by the lane and blocks in the sink.
        assert_eq!(submitter.submit(result("node-a", 1)).await, SubmitOutcome::Queued);
        while sink.started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // Second fills the queue; third waits out the submit timeout.
        assert_eq!(submitter.submit(result("node-a", 2)).await, SubmitOutcome::Queued);
        let started = tokio::time::Instant::now();
        assert_eq!(submitter.submit(result("node-a", 3)).await, SubmitOutcome::Dropped);
        assert!(started.elapsed() >= Duration::from_millis(20));

        open_tx.send(true).unwrap();
        drop(submitter);
        let stats = forwarder.close().await;

        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.written, 2);
        assert_eq!(*sink.writes.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn write_failures_are_counted_not_propagated() {
        let forwarder = Forwarder::new(Arc::new(FailingSink), settings(2, 8));
        let submitter = forwarder.submitter();

        for seq in 1..=3 {
            assert_eq!(submitter.submit(result("node-a", seq)).await, SubmitOutcome::Queued);
        }
        drop(submitter);

        let stats = forwarder.close().await;
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.written, 0);
    }

    #[tokio::test]
    async fn slow_writes_time_out() {
        let sink = Arc::new(RecordingSink::with_delay(Duration::from_millis(200)));
        let mut settings = settings(1, 4);
        settings.write_timeout = Duration::from_millis(10);
        let forwarder = Forwarder::new(sink, settings);

        forwarder.submitter().submit(result("node-a", 1)).await;
        let stats = forwarder.close().await;
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn lane_choice_is_stable() {
        assert_eq!(lane_for("node-a", 8), lane_for("node-a", 8));
        assert!(lane_for("node-b", 3) < 3);
    }
}
