//! Snapshot comparison.
//!
//! # Responsibilities
//! - Decide whether a freshly fetched snapshot differs from the last one
//!
//! # Design Decisions
//! - Instance sets are unordered; identity is the instance id
//! - Lookups go through a `HashMap` keyed by id, never a nested scan
//! - A missing config file and an empty one are different states
//! - Duplicate ids cannot be matched one-to-one, so a set containing them is
//!   always reported as changed (with a warning). A control plane that keeps
//!   returning duplicates triggers `on_change` on every tick.

use std::collections::{HashMap, HashSet};

use crate::control_plane::{ConfigSnapshot, Instance};

/// True if the two instance sets differ in membership or in any attribute.
pub fn instances_changed(old: &[Instance], new: &[Instance]) -> bool {
    if old.len() != new.len() {
        return true;
    }
    if old.is_empty() {
        return false;
    }

    let current: HashMap<&str, &Instance> = new.iter().map(|i| (i.id.as_str(), i)).collect();
    let previous_ids: HashSet<&str> = old.iter().map(|i| i.id.as_str()).collect();
    if current.len() != new.len() || previous_ids.len() != old.len() {
        tracing::warn!(
            instances = new.len(),
            distinct_ids = current.len(),
            "Instance set contains duplicate ids, reporting it as changed"
        );
        return true;
    }

    old.iter().any(|prev| match current.get(prev.id.as_str()) {
        Some(cur) => instance_differs(prev, cur),
        None => true,
    })
}

fn instance_differs(a: &Instance, b: &Instance) -> bool {
    a.host != b.host
        || a.port != b.port
        || a.protocol != b.protocol
        || a.version != b.version
        || a.weight != b.weight
        || a.healthy != b.healthy
        || a.isolated != b.isolated
        || metadata_differs(&a.metadata, &b.metadata)
}

fn metadata_differs(a: &HashMap<String, String>, b: &HashMap<String, String>) -> bool {
    a.len() != b.len() || a.iter().any(|(k, v)| b.get(k) != Some(v))
}

/// True if the config file appeared, disappeared, or changed identity or content.
///
/// `None` and a snapshot with `present == false` are both "absent".
pub fn config_changed(old: Option<&ConfigSnapshot>, new: Option<&ConfigSnapshot>) -> bool {
    let old = old.filter(|s| s.present);
    let new = new.filter(|s| s.present);

    match (old, new) {
        (None, None) => false,
        (Some(_), None) | (None, Some(_)) => true,
        (Some(a), Some(b)) => {
            a.namespace != b.namespace
                || a.group != b.group
                || a.file_name != b.file_name
                || a.has_content() != b.has_content()
                || a.content != b.content
        }
    }
}
