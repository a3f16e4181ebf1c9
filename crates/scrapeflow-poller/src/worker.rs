//! Poll worker — one background task per scrape target.
//!
//! ```text
//!        ┌───────────── tick ─────────────┐
//!        ▼                                │
//!      Idle ──► Fetching ──► Aggregating ──► Forwarding
//!        │          │ (error)                  │
//!        │          └──────────► Idle ◄────────┘
//!        └── shutdown / retire ──► Cancelled
//! ```
//!
//! Cancellation is only observed in `Idle`; an in-flight fetch runs to
//! completion or timeout first.

use std::time::Duration;

use scrapeflow_core::{ScrapeResult, ScrapeTarget, TargetId, epoch_millis};
use scrapeflow_exposition::{aggregate, parse};
use scrapeflow_forward::{SubmitOutcome, Submitter};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::fetch::HttpFetcher;

/// Consecutive fetch failures after which a target is reported degraded.
pub const DEGRADED_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Fetching,
    Aggregating,
    Forwarding,
    /// Terminal.
    Cancelled,
}

/// Poll cadence shared by the targets of one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub interval: Duration,
    /// Upper bound for the interval while fetches keep failing.
    pub max_backoff: Duration,
}

impl Schedule {
    /// Create a schedule; `max_backoff` is raised to at least `interval`.
    pub fn new(interval: Duration, max_backoff: Duration) -> Self {
        Self {
            interval,
            max_backoff: max_backoff.max(interval),
        }
    }
}

// ── Backoff ────────────────────────────────────────────────────────

/// Tracks consecutive fetch failures of one target.
///
/// Every failure doubles the wait before the next tick, capped at
/// `max_backoff`. A success resets it to the base interval.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    current: Duration,
    max: Duration,
    consecutive_failures: u32,
}

impl Backoff {
    /// Start at the schedule's base interval with no failures.
    pub fn new(schedule: Schedule) -> Self {
        Self {
            base: schedule.interval,
            current: schedule.interval,
            max: schedule.max_backoff.max(schedule.interval),
            consecutive_failures: 0,
        }
    }

    /// Record a failed fetch; returns the consecutive failure count.
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures += 1;
        self.current = self.current.saturating_mul(2).min(self.max);
        self.consecutive_failures
    }

    /// Record a successful fetch; returns the failure streak it ended.
    pub fn record_success(&mut self) -> u32 {
        let streak = self.consecutive_failures;
        self.consecutive_failures = 0;
        self.current = self.base;
        streak
    }

    /// Failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Wait before the next tick.
    pub fn next_interval(&self) -> Duration {
        self.current
    }
}

// ── Handle ─────────────────────────────────────────────────────────

/// Owner's side of a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    target: ScrapeTarget,
    state: watch::Receiver<WorkerState>,
    retire: watch::Sender<bool>,
    done: oneshot::Receiver<()>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// The target this worker polls.
    pub fn target(&self) -> &ScrapeTarget {
        &self.target
    }

    /// Id of the polled target.
    pub fn target_id(&self) -> &str {
        &self.target.id
    }

    /// Current state of the poll loop.
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions.
    pub fn state_watch(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    /// Whether the worker loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask this worker alone to stop at its next `Idle`.
    pub fn retire(&self) {
        self.retire.send_replace(true);
    }

    /// Wait for the done-signal.
    pub async fn wait(self) {
        // The guard always sends before dropping the sender; an error here
        // still means the loop is gone.
        let _ = self.done.await;
    }
}

// ── Worker ─────────────────────────────────────────────────────────

/// Fires the done-signal exactly once, however the loop exits.
struct DoneGuard {
    target_id: TargetId,
    state: watch::Sender<WorkerState>,
    done: Option<oneshot::Sender<()>>,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!(target_id = %self.target_id, "poll worker panicked");
        }
        self.state.send_replace(WorkerState::Cancelled);
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

/// Spawn the poll loop for `target`. Requires a tokio runtime.
pub fn spawn_worker(
    target: ScrapeTarget,
    schedule: Schedule,
    fetcher: HttpFetcher,
    submitter: Submitter,
    shutdown: watch::Receiver<bool>,
) -> Result<WorkerHandle, WorkerError> {
    if schedule.interval.is_zero() {
        return Err(WorkerError::ZeroInterval {
            target_id: target.id.clone(),
        });
    }

    let (state_tx, state_rx) = watch::channel(WorkerState::Idle);
    let (retire_tx, retire_rx) = watch::channel(false);
    let (done_tx, done_rx) = oneshot::channel();

    let guard = DoneGuard {
        target_id: target.id.clone(),
        state: state_tx,
        done: Some(done_tx),
    };

    let worker = Worker {
        target: target.clone(),
        backoff: Backoff::new(schedule),
        sequence: 0,
        fetcher,
        submitter,
    };
    let task = tokio::spawn(worker.run(guard, shutdown, retire_rx));

    Ok(WorkerHandle {
        target,
        state: state_rx,
        retire: retire_tx,
        done: done_rx,
        task,
    })
}

struct Worker {
    target: ScrapeTarget,
    backoff: Backoff,
    sequence: u64,
    fetcher: HttpFetcher,
    submitter: Submitter,
}

impl Worker {
    async fn run(
        mut self,
        guard: DoneGuard,
        mut shutdown: watch::Receiver<bool>,
        mut retire: watch::Receiver<bool>,
    ) {
        let target_id = self.target.id.clone();
        debug!(%target_id, interval = ?self.backoff.next_interval(), "poll worker starting");

        loop {
            guard.state.send_replace(WorkerState::Idle);
            let wait = self.backoff.next_interval();

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    debug!(%target_id, "poll worker shutting down");
                    break;
                }
                _ = retire_requested(&mut retire) => {
                    info!(%target_id, "poll worker retired");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            self.tick(&guard.state).await;
        }

        // Release the submitter before signalling done.
        drop(self);
        drop(guard);
    }

    async fn tick(&mut self, state: &watch::Sender<WorkerState>) {
        let target_id = &self.target.id;

        state.send_replace(WorkerState::Fetching);
        let body = match self.fetcher.fetch(&self.target).await {
            Ok(body) => {
                let streak = self.backoff.record_success();
                if streak >= DEGRADED_THRESHOLD {
                    info!(%target_id, failures = streak, "target recovered");
                }
                body
            }
            Err(e) => {
                let failures = self.backoff.record_failure();
                if failures == DEGRADED_THRESHOLD {
                    warn!(
                        %target_id,
                        failures,
                        next_in = ?self.backoff.next_interval(),
                        error = %e,
                        "target degraded, fetches keep failing"
                    );
                } else {
                    warn!(%target_id, operation = "fetch", failures, error = %e, "fetch failed");
                }
                return;
            }
        };

        state.send_replace(WorkerState::Aggregating);
        let collected_at_ms = epoch_millis();
        let aggregation = aggregate(&parse(&body), collected_at_ms);
        for skipped in &aggregation.skipped {
            warn!(
                %target_id,
                operation = "aggregate",
                family = %skipped.name,
                error = %skipped.error,
                "malformed family skipped"
            );
        }

        self.sequence += 1;
        let result = ScrapeResult {
            target_id: target_id.clone(),
            category: self.target.category.clone(),
            address: self.target.address.clone(),
            collected_at_ms,
            sequence: self.sequence,
            families: aggregation.families,
        };
        debug!(
            %target_id,
            sequence = result.sequence,
            families = result.families.len(),
            samples = result.sample_count(),
            "scrape result ready"
        );

        state.send_replace(WorkerState::Forwarding);
        if self.submitter.submit(result).await == SubmitOutcome::Dropped {
            debug!(%target_id, sequence = self.sequence, "scrape result not forwarded");
        }
    }
}

/// Resolves once shutdown is requested or the supervisor is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Resolves once the worker is retired. A dropped handle detaches.
async fn retire_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
