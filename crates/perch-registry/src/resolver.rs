//! Client-side resolution

use crate::discovery::{diff, Change, DiscoveryResult, Instance};
use crate::error::{RegistryError, RegistryResult};
use crate::instance::InstanceRecord;
use crate::key::KeySchema;
use crate::store::{bounded, CoordinationStore, StoreOp};
use async_trait::async_trait;
use perch_core::constants::{INSTANCE_WEIGHT_DEFAULT, STORE_CALL_TIMEOUT_MS_DEFAULT};
use perch_core::PerchConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Client-side discovery contract
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolution description for a service; used as the cache key
    fn target(&self, service_name: &str) -> String;

    /// List the live instances of `description`
    async fn resolve(&self, description: &str) -> RegistryResult<DiscoveryResult>;

    /// Compare two snapshots of the same service
    fn diff(
        &self,
        cache_key: &str,
        prev: &DiscoveryResult,
        next: &DiscoveryResult,
    ) -> (Change, bool) {
        diff(cache_key, prev, next)
    }

    /// Resolver name
    fn name(&self) -> &str;
}

/// [`Resolver`] that lists the keys written by `LeaseRegistry`
#[derive(Debug, Clone)]
pub struct LeaseResolver {
    store: Arc<dyn CoordinationStore>,
    schema: KeySchema,
    default_weight: i64,
    call_timeout: Duration,
}

impl LeaseResolver {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            schema: KeySchema::default(),
            default_weight: INSTANCE_WEIGHT_DEFAULT,
            call_timeout: Duration::from_millis(STORE_CALL_TIMEOUT_MS_DEFAULT),
        }
    }

    /// Resolver configured from `config`
    pub fn from_config(
        store: Arc<dyn CoordinationStore>,
        config: &PerchConfig,
    ) -> RegistryResult<Self> {
        config.validate()?;
        let mut resolver = Self::new(store)
            .with_default_weight(config.registry.default_weight)
            .with_call_timeout(Duration::from_millis(config.store.call_timeout_ms));
        if let Some(prefix) = &config.registry.key_prefix {
            resolver = resolver.with_key_prefix(prefix);
        }
        Ok(resolver)
    }

    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.schema = KeySchema::new(Some(prefix));
        self
    }

    /// Weight reported for instances stored with weight <= 0
    pub fn with_default_weight(mut self, weight: i64) -> Self {
        assert!(weight > 0, "default weight must be positive");
        self.default_weight = weight;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[async_trait]
impl Resolver for LeaseResolver {
    fn target(&self, service_name: &str) -> String {
        service_name.to_string()
    }

    async fn resolve(&self, description: &str) -> RegistryResult<DiscoveryResult> {
        let prefix = self.schema.service_prefix(description);
        let kvs = bounded(
            StoreOp::Get,
            self.call_timeout,
            self.store.get(&prefix, true),
        )
        .await?;

        let mut instances = Vec::with_capacity(kvs.len());
        for kv in &kvs {
            if self.schema.address_of(description, &kv.key).is_none() {
                debug!(key = %kv.key, service = %description, "Skipping key of another service");
                continue;
            }
            let record = match InstanceRecord::decode(&kv.key, &kv.value) {
                Ok(record) => record,
                Err(e) => {
                    warn!(key = %kv.key, error = %e, "Skipping undecodable instance");
                    continue;
                }
            };
            let mut instance = Instance::from(record);
            if instance.weight <= 0 {
                instance.weight = self.default_weight;
            }
            instances.push(instance);
        }

        if instances.is_empty() {
            return Err(RegistryError::NoInstances {
                service: description.to_string(),
            });
        }

        debug!(service = %description, count = instances.len(), "Resolved");
        Ok(DiscoveryResult::new(description, instances))
    }

    fn name(&self) -> &str {
        "etcd"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LeaseId;
    use crate::memory::MemoryStore;
    use perch_core::io::WallClockTime;
    use std::collections::BTreeMap;

    async fn setup() -> (MemoryStore, LeaseId, LeaseResolver) {
        let memory = MemoryStore::new(Arc::new(WallClockTime::new()));
        let lease = memory.grant_lease(60).await.unwrap();
        let resolver = LeaseResolver::new(Arc::new(memory.clone()));
        (memory, lease, resolver)
    }

    async fn put(memory: &MemoryStore, lease: LeaseId, service: &str, address: &str, weight: i64) {
        let key = KeySchema::default().service_key(service, address);
        let value = InstanceRecord::new("tcp", address, weight, BTreeMap::new())
            .encode()
            .unwrap();
        memory.put(&key, value, lease).await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_lists_instances() {
        let (memory, lease, resolver) = setup().await;
        put(&memory, lease, "svc", "10.0.0.1:80", 20).await;
        put(&memory, lease, "svc", "10.0.0.2:80", 30).await;

        let result = resolver.resolve("svc").await.unwrap();
        assert!(result.cacheable);
        assert_eq!(result.cache_key, "svc");
        let addresses: Vec<_> = result.instances.iter().map(|i| i.address.as_str()).collect();
        assert_eq!(addresses, vec!["10.0.0.1:80", "10.0.0.2:80"]);
        assert_eq!(result.instances[1].weight, 30);
    }

    #[tokio::test]
    async fn test_resolve_does_not_cross_service_boundary() {
        let (memory, lease, resolver) = setup().await;
        put(&memory, lease, "svc", "10.0.0.1:80", 10).await;
        put(&memory, lease, "svc-2", "10.0.0.9:80", 10).await;

        let result = resolver.resolve("svc").await.unwrap();
        assert_eq!(result.instances.len(), 1);
        assert_eq!(result.instances[0].address, "10.0.0.1:80");

        let result = resolver.resolve("svc-2").await.unwrap();
        assert_eq!(result.instances.len(), 1);
        assert_eq!(result.instances[0].address, "10.0.0.9:80");
    }

    #[tokio::test]
    async fn test_non_positive_weight_defaulted() {
        let (memory, lease, resolver) = setup().await;
        put(&memory, lease, "svc", "10.0.0.1:80", 0).await;
        put(&memory, lease, "svc", "10.0.0.2:80", -3).await;

        let result = resolver.resolve("svc").await.unwrap();
        assert!(result.instances.iter().all(|i| i.weight == INSTANCE_WEIGHT_DEFAULT));

        let resolver = resolver.with_default_weight(7);
        let result = resolver.resolve("svc").await.unwrap();
        assert!(result.instances.iter().all(|i| i.weight == 7));
    }

    #[tokio::test]
    async fn test_malformed_entries_skipped() {
        let (memory, lease, resolver) = setup().await;
        put(&memory, lease, "svc", "10.0.0.1:80", 10).await;
        memory
            .put("perch/registry/svc/garbage", b"not json".to_vec(), lease)
            .await
            .unwrap();

        let result = resolver.resolve("svc").await.unwrap();
        assert_eq!(result.instances.len(), 1);
    }

    #[tokio::test]
    async fn test_no_instances() {
        let (memory, lease, resolver) = setup().await;
        let err = resolver.resolve("svc").await.unwrap_err();
        assert!(matches!(err, RegistryError::NoInstances { .. }));
        assert!(!err.is_retriable());

        memory
            .put("perch/registry/svc/bad", b"{".to_vec(), lease)
            .await
            .unwrap();
        let err = resolver.resolve("svc").await.unwrap_err();
        assert!(matches!(err, RegistryError::NoInstances { .. }));
    }

    #[tokio::test]
    async fn test_custom_prefix() {
        let (memory, lease, _) = setup().await;
        let value = InstanceRecord::new("tcp", "10.0.0.1:80", 10, BTreeMap::new())
            .encode()
            .unwrap();
        memory
            .put("custom/svc/10.0.0.1:80", value, lease)
            .await
            .unwrap();

        let resolver = LeaseResolver::new(Arc::new(memory.clone())).with_key_prefix("custom");
        assert_eq!(resolver.resolve("svc").await.unwrap().instances.len(), 1);
    }

    #[tokio::test]
    async fn test_target_and_name() {
        let (_memory, _lease, resolver) = setup().await;
        assert_eq!(resolver.target("svc"), "svc");
        assert_eq!(resolver.name(), "etcd");
    }

    #[tokio::test]
    async fn test_diff_through_resolver() {
        let (memory, lease, resolver) = setup().await;
        put(&memory, lease, "svc", "10.0.0.1:80", 10).await;
        let first = resolver.resolve("svc").await.unwrap();
        put(&memory, lease, "svc", "10.0.0.2:80", 10).await;
        let second = resolver.resolve("svc").await.unwrap();

        let (change, has_changes) = resolver.diff("svc", &first, &second);
        assert!(has_changes);
        assert_eq!(change.added.len(), 1);
        assert_eq!(change.added[0].address, "10.0.0.2:80");
    }
}
