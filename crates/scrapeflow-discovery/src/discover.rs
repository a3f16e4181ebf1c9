//! Category → scrape targets.

use std::collections::BTreeMap;

use scrapeflow_core::ScrapeTarget;
use tracing::{debug, info, warn};

use crate::directory::Directory;
use crate::error::DiscoveryError;

/// Resolve every host tagged `category` into a [`ScrapeTarget`] on `port`.
///
/// Hosts with any other tag are discarded. Targets resolving to the same
/// id are collapsed, the last one seen wins. The result is ordered by id.
///
/// A reachable directory with no matching hosts yields an empty list and a
/// warning; only an unreachable or undecodable directory is an error.
pub async fn discover(
    directory: &dyn Directory,
    category: &str,
    port: u16,
) -> Result<Vec<ScrapeTarget>, DiscoveryError> {
    let instances = directory.query(category).await?;

    let mut targets: BTreeMap<String, ScrapeTarget> = BTreeMap::new();
    for instance in &instances {
        for host in instance.hosts.iter().filter(|h| h.kind == category) {
            if host.ip.is_empty() {
                debug!(instance = %instance.id, host = %host.name, "host without ip skipped");
                continue;
            }
            let target = ScrapeTarget::new(category, &host.ip, port);
            if targets.insert(target.id.clone(), target).is_some() {
                debug!(instance = %instance.id, ip = %host.ip, "duplicate target id, keeping latest");
            }
        }
    }

    if targets.is_empty() {
        warn!(%category, "directory has no targets for category");
    } else {
        info!(%category, instances = instances.len(), targets = targets.len(), "targets discovered");
    }

    Ok(targets.into_values().collect())
}
