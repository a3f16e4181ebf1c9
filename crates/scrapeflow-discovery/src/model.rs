//! Directory record model.
//!
//! Mirrors the service-broker instance documents the directory stores;
//! only `hosts` matters for discovery, the rest is carried for logging.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One provisioned service instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceInstance {
    pub id: String,
    pub service_definition_id: String,
    pub plan_id: String,
    pub organization_guid: String,
    pub space_guid: String,
    pub dashboard_url: String,
    pub internal_id: String,
    pub hosts: Vec<ServerAddress>,
    pub context: HashMap<String, String>,
}

/// One network address of a service instance, tagged with a category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerAddress {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub backup: bool,
    /// Category tag; matched against the scrape endpoint category.
    #[serde(rename = "type")]
    pub kind: String,
}

impl ServiceInstance {
    /// Whether any host carries the given category tag.
    pub fn has_category(&self, category: &str) -> bool {
        self.hosts.iter().any(|h| h.kind == category)
    }
}
