//! Coordination store with injected faults

use crate::fault::{FaultInjector, FaultType};
use async_trait::async_trait;
use perch_registry::{
    CoordinationStore, KeepAliveStream, KeyValue, LeaseId, MemoryStore, StoreError, StoreOp,
    StoreResult,
};
use std::sync::Arc;

/// [`MemoryStore`] whose calls fail as the [`FaultInjector`] decides
#[derive(Debug, Clone)]
pub struct FaultyStore {
    inner: MemoryStore,
    faults: Arc<FaultInjector>,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore, faults: Arc<FaultInjector>) -> Self {
        Self { inner, faults }
    }

    /// The wrapped store, bypassing faults
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(&self, op: StoreOp) -> StoreResult<()> {
        match self.faults.should_inject(op) {
            None => Ok(()),
            Some(FaultType::Timeout) => Err(StoreError::Timeout { op, timeout_ms: 0 }),
            Some(fault) => Err(StoreError::failed(op, format!("injected {}", fault.name()))),
        }
    }
}

#[async_trait]
impl CoordinationStore for FaultyStore {
    async fn grant_lease(&self, ttl_secs: i64) -> StoreResult<LeaseId> {
        self.check(StoreOp::GrantLease)?;
        self.inner.grant_lease(ttl_secs).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: LeaseId) -> StoreResult<()> {
        self.check(StoreOp::Put)?;
        self.inner.put(key, value, lease).await
    }

    async fn get(&self, key: &str, with_prefix: bool) -> StoreResult<Vec<KeyValue>> {
        self.check(StoreOp::Get)?;
        self.inner.get(key, with_prefix).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check(StoreOp::Delete)?;
        self.inner.delete(key).await
    }

    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<Box<dyn KeepAliveStream>> {
        self.check(StoreOp::KeepAlive)?;
        self.inner.keep_alive(lease).await
    }
}
