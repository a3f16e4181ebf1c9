//! Worker supervisor — spawns, retires and stops poll workers.

use std::collections::{BTreeMap, HashSet};

use scrapeflow_core::ScrapeTarget;
use scrapeflow_forward::Submitter;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::WorkerError;
use crate::fetch::HttpFetcher;
use crate::worker::{Schedule, WorkerHandle, spawn_worker};

/// Owns the shared collaborators handed to every worker and the single
/// shutdown signal they all observe.
///
/// Holds a [`Submitter`] clone, so the forwarder cannot finish closing
/// while a supervisor is alive.
pub struct Supervisor {
    fetcher: HttpFetcher,
    submitter: Submitter,
    shutdown: watch::Sender<bool>,
}

impl Supervisor {
    /// Create a supervisor sharing `fetcher` and `submitter` with every
    /// worker it spawns.
    pub fn new(fetcher: HttpFetcher, submitter: Submitter) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            fetcher,
            submitter,
            shutdown,
        }
    }

    /// Whether [`Supervisor::shutdown`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Spawn one worker per unique target id and return immediately.
    ///
    /// When ids repeat, the last target with that id is used.
    pub fn start(
        &self,
        targets: Vec<ScrapeTarget>,
        schedule: Schedule,
    ) -> Result<Vec<WorkerHandle>, WorkerError> {
        let targets = dedupe(targets);
        let mut handles = Vec::with_capacity(targets.len());
        for target in targets {
            handles.push(self.spawn(target, schedule)?);
        }
        info!(workers = handles.len(), interval = ?schedule.interval, "poll workers started");
        Ok(handles)
    }

    /// Cancel every worker and wait until each has fired its done-signal.
    ///
    /// Waits without a deadline; callers wanting one wrap this in a timeout.
    pub async fn shutdown(&self, handles: Vec<WorkerHandle>) {
        self.shutdown.send_replace(true);
        let workers = handles.len();
        info!(workers, "stopping poll workers");

        for handle in handles {
            handle.wait().await;
        }
        info!(workers, "all poll workers stopped");
    }

    /// Bring a running worker set in line with a fresh discovery snapshot.
    ///
    /// Workers whose id vanished are retired and awaited, new ids get a
    /// worker, and everything else keeps running untouched. A worker whose
    /// loop has already exited is replaced.
    ///
    /// `handles` is updated in place and always holds every worker still
    /// running, so an error leaves nothing unawaited. A zero interval is
    /// rejected before any worker is touched.
    pub async fn reconcile(
        &self,
        handles: &mut Vec<WorkerHandle>,
        discovered: Vec<ScrapeTarget>,
        schedule: Schedule,
    ) -> Result<(), WorkerError> {
        let mut wanted: BTreeMap<String, ScrapeTarget> = dedupe(discovered)
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        if let (true, Some(target_id)) = (schedule.interval.is_zero(), wanted.keys().next()) {
            return Err(WorkerError::ZeroInterval {
                target_id: target_id.clone(),
            });
        }

        let mut retired = Vec::new();
        for handle in std::mem::take(handles) {
            if wanted.contains_key(handle.target_id()) && !handle.is_finished() {
                wanted.remove(handle.target_id());
                handles.push(handle);
            } else {
                if handle.is_finished() {
                    warn!(target_id = %handle.target_id(), "poll worker exited unexpectedly");
                }
                handle.retire();
                retired.push(handle);
            }
        }

        let retired_count = retired.len();
        for handle in retired {
            handle.wait().await;
        }

        let added = wanted.len();
        for (_, target) in wanted {
            handles.push(self.spawn(target, schedule)?);
        }

        if added > 0 || retired_count > 0 {
            info!(added, retired = retired_count, workers = handles.len(), "poll workers reconciled");
        }
        Ok(())
    }

    fn spawn(&self, target: ScrapeTarget, schedule: Schedule) -> Result<WorkerHandle, WorkerError> {
        spawn_worker(
            target,
            schedule,
            self.fetcher.clone(),
            self.submitter.clone(),
            self.shutdown.subscribe(),
        )
    }
}

/// Keep the last target per id, in first-seen order.
fn dedupe(targets: Vec<ScrapeTarget>) -> Vec<ScrapeTarget> {
    let mut seen = HashSet::new();
    let mut unique: Vec<ScrapeTarget> = targets
        .into_iter()
        .rev()
        .filter(|t| seen.insert(t.id.clone()))
        .collect();
    unique.reverse();
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, port: u16) -> ScrapeTarget {
        ScrapeTarget {
            id: id.to_string(),
            category: "node".to_string(),
            address: "127.0.0.1".to_string(),
            port,
        }
    }

    #[test]
    fn dedupe_keeps_last_per_id() {
        let unique = dedupe(vec![target("a", 1), target("b", 2), target("a", 3)]);
        let ids: Vec<_> = unique.iter().map(|t| (t.id.as_str(), t.port)).collect();
        assert_eq!(ids, vec![("b", 2), ("a", 3)]);
    }
}
