//! Process-wide shutdown coordination.
//!
//! Any number of [`ShutdownTrigger`] clones (signal handlers, fatal
//! paths, tests) can request a shutdown; only the first request counts.
//! The [`ShutdownCoordinator`] turns that request into exactly one
//! [`Supervisor::shutdown`].

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use crate::supervisor::Supervisor;
use crate::worker::WorkerHandle;

#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    /// Request a shutdown. Returns `true` only for the first request.
    pub fn request(&self) -> bool {
        let first = self.tx.send_if_modified(|requested| {
            if *requested {
                false
            } else {
                *requested = true;
                true
            }
        });
        if first {
            info!("shutdown requested");
        } else {
            info!("shutdown already in progress");
        }
        first
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }
}

pub struct ShutdownCoordinator {
    rx: watch::Receiver<bool>,
}

impl ShutdownCoordinator {
    /// Create a coordinator and the trigger that fires it.
    pub fn new() -> (Self, ShutdownTrigger) {
        let (tx, rx) = watch::channel(false);
        (Self { rx }, ShutdownTrigger { tx: Arc::new(tx) })
    }

    /// Wait for the first shutdown request.
    ///
    /// Dropping every trigger also counts as a request, since nothing
    /// could ask for shutdown afterwards.
    pub async fn requested(&mut self) {
        if self.rx.wait_for(|requested| *requested).await.is_err() {
            info!("all shutdown triggers dropped");
        }
    }

    /// Wait for the shutdown request, then stop every worker.
    ///
    /// Returns only after each worker has fired its done-signal. The
    /// supervisor is dropped on return, releasing its forwarder submitter.
    pub async fn run(mut self, supervisor: Supervisor, handles: Vec<WorkerHandle>) {
        self.requested().await;
        supervisor.shutdown(handles).await;
    }
}

/// Forward SIGINT and, on unix, SIGTERM to `trigger`.
///
/// Keeps listening after the first signal so repeated signals are logged
/// instead of killing the process mid-drain.
pub async fn listen_for_signals(trigger: ShutdownTrigger) {
    loop {
        match next_signal().await {
            Ok(signal) => {
                info!(%signal, "signal received");
                trigger.request();
            }
            Err(e) => {
                error!(error = %e, "failed to install signal handler");
                return;
            }
        }
    }
}

#[cfg(unix)]
async fn next_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn next_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
}
