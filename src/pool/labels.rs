//! Container labels as the durable record of provisioning facts.
//!
//! A container's resource limits and network mode are never stored
//! anywhere the engine itself doesn't already keep them — they are encoded
//! into labels at creation time so the Reconciler's adoption path can
//! reconstruct a full row from engine ground truth alone.

use crate::state::{NetworkMode, ResourceLimits};
use std::collections::HashMap;

fn key(prefix: &str, suffix: &str) -> String {
    format!("{prefix}.{suffix}")
}

pub fn build(prefix: &str, limits: &ResourceLimits, network: NetworkMode) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert(key(prefix, "managed"), "true".to_string());
    labels.insert(key(prefix, "memory"), limits.memory_bytes.to_string());
    labels.insert(key(prefix, "cpu"), limits.cpu_cores.to_string());
    labels.insert(key(prefix, "pids"), limits.max_processes.to_string());
    labels.insert(key(prefix, "network"), network.as_engine_str().to_string());
    labels.insert(key(prefix, "created"), chrono::Utc::now().to_rfc3339());
    labels
}

#[cfg(test)]
fn parse_limits(prefix: &str, labels: &HashMap<String, String>) -> Option<ResourceLimits> {
    Some(ResourceLimits {
        memory_bytes: labels.get(&key(prefix, "memory"))?.parse().ok()?,
        cpu_cores: labels.get(&key(prefix, "cpu"))?.parse().ok()?,
        max_processes: labels.get(&key(prefix, "pids"))?.parse().ok()?,
    })
}

#[cfg(test)]
fn parse_network(prefix: &str, labels: &HashMap<String, String>) -> Option<NetworkMode> {
    match labels.get(&key(prefix, "network"))?.as_str() {
        "none" => Some(NetworkMode::None),
        "bridge" => Some(NetworkMode::Bridge),
        "host" => Some(NetworkMode::Host),
        _ => None,
    }
}
