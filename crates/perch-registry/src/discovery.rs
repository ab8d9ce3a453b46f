//! Discovery results and snapshot diffing

use crate::instance::InstanceRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A resolved instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub network: String,
    pub address: String,
    pub weight: i64,
    pub tags: BTreeMap<String, String>,
}

impl Instance {
    pub fn new(network: impl Into<String>, address: impl Into<String>, weight: i64) -> Self {
        Self {
            network: network.into(),
            address: address.into(),
            weight,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Identity used when comparing snapshots
    pub fn identity(&self) -> (&str, &str) {
        (&self.network, &self.address)
    }
}

impl From<InstanceRecord> for Instance {
    fn from(record: InstanceRecord) -> Self {
        Self {
            network: record.network,
            address: record.address,
            weight: record.weight,
            tags: record.tags,
        }
    }
}

/// One resolution snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub cacheable: bool,
    pub cache_key: String,
    pub instances: Vec<Instance>,
}

impl DiscoveryResult {
    /// A cacheable snapshot keyed by `cache_key`
    pub fn new(cache_key: impl Into<String>, instances: Vec<Instance>) -> Self {
        Self {
            cacheable: true,
            cache_key: cache_key.into(),
            instances,
        }
    }
}

/// Difference between two snapshots of the same service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// The newer snapshot
    pub result: DiscoveryResult,
    pub added: Vec<Instance>,
    pub updated: Vec<Instance>,
    pub removed: Vec<Instance>,
}

impl Change {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Compare `prev` and `next` by (network, address)
///
/// Added and updated entries follow `next`'s order, removed entries follow
/// `prev`'s. An instance present in both is updated when its weight or tags
/// differ; the entry reported is the one from `next`.
pub fn diff(cache_key: &str, prev: &DiscoveryResult, next: &DiscoveryResult) -> (Change, bool) {
    let before: HashMap<(&str, &str), &Instance> =
        prev.instances.iter().map(|i| (i.identity(), i)).collect();
    let after: HashMap<(&str, &str), &Instance> =
        next.instances.iter().map(|i| (i.identity(), i)).collect();

    let mut added = Vec::new();
    let mut updated = Vec::new();
    for instance in &next.instances {
        match before.get(&instance.identity()) {
            None => added.push(instance.clone()),
            Some(old) if old.weight != instance.weight || old.tags != instance.tags => {
                updated.push(instance.clone())
            }
            Some(_) => {}
        }
    }

    let removed: Vec<Instance> = prev
        .instances
        .iter()
        .filter(|i| !after.contains_key(&i.identity()))
        .cloned()
        .collect();

    let mut result = next.clone();
    result.cache_key = cache_key.to_string();

    let change = Change {
        result,
        added,
        updated,
        removed,
    };
    let has_changes = !change.is_empty();
    (change, has_changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(instances: Vec<Instance>) -> DiscoveryResult {
        DiscoveryResult::new("svc", instances)
    }

    fn a() -> Instance {
        Instance::new("tcp", "10.0.0.1:80", 10)
    }

    fn b() -> Instance {
        Instance::new("tcp", "10.0.0.2:80", 10)
    }

    #[test]
    fn test_identical_snapshots_have_no_changes() {
        let r = snapshot(vec![a(), b()]);
        let (change, has_changes) = diff("svc", &r, &r);
        assert!(!has_changes);
        assert!(change.is_empty());
        assert_eq!(change.result, r);
    }

    #[test]
    fn test_added_instance() {
        let (change, has_changes) = diff("svc", &snapshot(vec![a()]), &snapshot(vec![a(), b()]));
        assert!(has_changes);
        assert_eq!(change.added, vec![b()]);
        assert!(change.updated.is_empty());
        assert!(change.removed.is_empty());
    }

    #[test]
    fn test_removed_instance() {
        let (change, has_changes) = diff("svc", &snapshot(vec![a(), b()]), &snapshot(vec![b()]));
        assert!(has_changes);
        assert_eq!(change.removed, vec![a()]);
        assert!(change.added.is_empty());
    }

    #[test]
    fn test_weight_or_tag_change_is_update() {
        let heavier = Instance::new("tcp", "10.0.0.1:80", 50);
        let (change, _) = diff("svc", &snapshot(vec![a()]), &snapshot(vec![heavier.clone()]));
        assert_eq!(change.updated, vec![heavier]);
        assert!(change.added.is_empty());
        assert!(change.removed.is_empty());

        let tagged = a().with_tag("zone", "b");
        let (change, has_changes) = diff("svc", &snapshot(vec![a()]), &snapshot(vec![tagged.clone()]));
        assert!(has_changes);
        assert_eq!(change.updated, vec![tagged]);
    }

    #[test]
    fn test_network_is_part_of_identity() {
        let udp = Instance::new("udp", "10.0.0.1:80", 10);
        let (change, _) = diff("svc", &snapshot(vec![a()]), &snapshot(vec![udp.clone()]));
        assert_eq!(change.added, vec![udp]);
        assert_eq!(change.removed, vec![a()]);
    }

    #[test]
    fn test_order_follows_snapshots() {
        let c = Instance::new("tcp", "10.0.0.3:80", 10);
        let d = Instance::new("tcp", "10.0.0.4:80", 10);
        let (change, _) = diff(
            "svc",
            &snapshot(vec![d.clone(), a(), c.clone()]),
            &snapshot(vec![b(), a()]),
        );
        assert_eq!(change.added, vec![b()]);
        assert_eq!(change.removed, vec![d, c]);
    }

    #[test]
    fn test_result_keyed_by_cache_key() {
        let (change, _) = diff("other", &snapshot(vec![]), &snapshot(vec![a()]));
        assert_eq!(change.result.cache_key, "other");
        assert_eq!(change.result.instances, vec![a()]);
    }
}
