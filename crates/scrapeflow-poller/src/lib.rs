//! scrapeflow-poller — the polling half of the agent.
//!
//! ```text
//!                 ShutdownCoordinator ◄── SIGINT / SIGTERM
//!                         │ run()
//!                         ▼
//!   targets ──► Supervisor ──spawn──► Worker(target) ×N ──submit──► Forwarder
//!                  │  shared shutdown watch    │
//!                  └──────── done-signal ◄─────┘
//! ```
//!
//! Every worker owns one target and loops
//! `Idle → Fetching → Aggregating → Forwarding → Idle` until cancelled.

pub mod error;
pub mod fetch;
pub mod shutdown;
pub mod supervisor;
pub mod worker;

pub use error::{FetchError, WorkerError};
pub use fetch::{DEFAULT_MAX_BODY_BYTES, HttpFetcher};
pub use shutdown::{ShutdownCoordinator, ShutdownTrigger, listen_for_signals};
pub use supervisor::Supervisor;
pub use worker::{Backoff, DEGRADED_THRESHOLD, Schedule, WorkerHandle, WorkerState, spawn_worker};
