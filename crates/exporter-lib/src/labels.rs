//! Registration label parsing
//!
//! Containers and volumes opt into export with Docker labels:
//! - `prometheus.job=<name>` registers the object under a job
//! - `prometheus.labels.<key>=<value>` attaches an extra label
//! - `prometheus.metrics.port` / `prometheus.metrics.host` advertise a scrape endpoint

use crate::models::{LabelSet, RegistrationInfo, ScrapeHint};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

pub const DISCOVERY_LABEL_PREFIX: &str = "prometheus.";
pub const JOB_LABEL: &str = "prometheus.job";
pub const TARGET_LABELS_PREFIX: &str = "prometheus.labels.";
pub const TARGET_PORT_LABEL: &str = "prometheus.metrics.port";
pub const TARGET_HOST_LABEL: &str = "prometheus.metrics.host";

/// Label names set by the exporter itself
pub mod reserved {
    pub const JOB: &str = "job";
    pub const CONTAINER_NAME: &str = "container_name";
    pub const CONTAINER_ID: &str = "container_id";
    pub const IMAGE: &str = "image";
    pub const IMAGE_ID: &str = "image_id";
    pub const VOLUME_NAME: &str = "volume_name";

    pub const ALL: [&str; 6] = [JOB, CONTAINER_NAME, CONTAINER_ID, IMAGE, IMAGE_ID, VOLUME_NAME];
}

/// Parse the registration labels of a container or volume
///
/// Returns `None` when the object carries no job label, which means it is
/// not exported at all.
pub fn parse_registration(raw: &HashMap<String, String>) -> Option<RegistrationInfo> {
    let job_name = raw.get(JOB_LABEL)?.trim();
    if job_name.is_empty() {
        return None;
    }

    // Lexicographic traversal keeps the outcome independent of map ordering
    let sorted: BTreeMap<&str, &str> = raw
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let mut extra_labels = LabelSet::new();
    for (key, value) in sorted {
        let Some(name) = key.strip_prefix(TARGET_LABELS_PREFIX) else {
            continue;
        };

        if !is_valid_label_name(name) {
            debug!(label = %key, "Ignoring malformed extra label");
            continue;
        }

        if reserved::ALL.contains(&name) {
            debug!(label = %key, "Ignoring extra label that shadows a reserved label");
            continue;
        }

        extra_labels.insert(name, value);
    }

    let scrape = raw
        .get(TARGET_PORT_LABEL)
        .map(|port| port.trim())
        .filter(|port| !port.is_empty())
        .map(|port| ScrapeHint {
            port: port.to_string(),
            host: raw
                .get(TARGET_HOST_LABEL)
                .map(|host| host.trim().to_string())
                .filter(|host| !host.is_empty()),
        });

    Some(RegistrationInfo {
        job_name: job_name.to_string(),
        extra_labels,
        scrape,
    })
}

/// Check a name against the Prometheus label name grammar
///
/// Names starting with `__` are reserved for Prometheus internals.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    let valid_start = match chars.next() {
        Some(c) => c.is_ascii_alphabetic() || c == '_',
        None => false,
    };

    valid_start
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with("__")
}

/// Base label set for every metric of a registered target
pub fn base_labels(registration: &RegistrationInfo) -> LabelSet {
    let mut labels = registration.extra_labels.clone();
    labels.insert(reserved::JOB, registration.job_name.clone());
    labels
}
