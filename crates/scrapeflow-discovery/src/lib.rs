//! scrapeflow-discovery — resolves a category into scrape targets.
//!
//! The directory (service broker database, inventory service, a JSON file)
//! is an external collaborator behind the [`Directory`] trait. It returns
//! service instance records; [`discover`] keeps the hosts tagged with the
//! requested category and turns them into deduplicated [`ScrapeTarget`]s.
//!
//! ```text
//! Directory::query(category) ──► [ServiceInstance { hosts: [ServerAddress] }]
//!         discover() ──► filter by host type ──► ScrapeTarget ──► dedup by id
//! ```
//!
//! [`ScrapeTarget`]: scrapeflow_core::ScrapeTarget

pub mod directory;
pub mod discover;
pub mod error;
pub mod model;

pub use directory::{Directory, FileDirectory, HttpDirectory, MemoryDirectory, QueryFuture};
pub use discover::discover;
pub use error::DiscoveryError;
pub use model::{ServerAddress, ServiceInstance};
