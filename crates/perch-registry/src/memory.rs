//! In-memory coordination store
//!
//! Suitable for single-process deployments and tests. Lease expiry follows
//! the injected [`TimeProvider`], so a simulated clock controls when keys
//! vanish. Expired leases and their keys are purged on every access.

use crate::store::{
    CoordinationStore, KeepAliveStream, KeyValue, LeaseHeartbeat, LeaseId, StoreError, StoreOp,
    StoreResult,
};
use async_trait::async_trait;
use perch_core::constants::{KEEPALIVE_HEARTBEATS_PER_TTL, LEASE_TTL_SECS_MAX};
use perch_core::io::TimeProvider;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct LeaseEntry {
    ttl_secs: i64,
    expires_at_ms: u64,
}

impl LeaseEntry {
    fn new(ttl_secs: i64, now_ms: u64) -> Self {
        let mut entry = Self {
            ttl_secs,
            expires_at_ms: 0,
        };
        entry.renew(now_ms);
        entry
    }

    fn renew(&mut self, now_ms: u64) {
        self.expires_at_ms = now_ms.saturating_add(self.ttl_ms());
    }

    fn ttl_ms(&self) -> u64 {
        (self.ttl_secs as u64).saturating_mul(1000)
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    lease: LeaseId,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_lease_id: i64,
    leases: HashMap<LeaseId, LeaseEntry>,
    keys: BTreeMap<String, StoredValue>,
}

impl MemoryState {
    /// Drop expired leases together with their keys
    fn purge_expired(&mut self, now_ms: u64) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, entry)| entry.expires_at_ms <= now_ms)
            .map(|(id, _)| *id)
            .collect();
        for lease in expired {
            self.revoke(lease);
        }
    }

    fn revoke(&mut self, lease: LeaseId) -> bool {
        if self.leases.remove(&lease).is_none() {
            return false;
        }
        self.keys.retain(|key, stored| {
            let keep = stored.lease != lease;
            if !keep {
                debug!(key = %key, lease = %lease, "Key removed with its lease");
            }
            keep
        });
        true
    }
}

/// In-memory store with lease semantics
#[derive(Clone)]
pub struct MemoryStore {
    time: Arc<dyn TimeProvider>,
    state: Arc<RwLock<MemoryState>>,
    keepalive_streams: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("time", &self.time)
            .field(
                "keepalive_streams",
                &self.keepalive_streams.load(Ordering::SeqCst),
            )
            .finish()
    }
}

impl MemoryStore {
    /// Create an empty store driven by `time`
    pub fn new(time: Arc<dyn TimeProvider>) -> Self {
        Self {
            time,
            state: Arc::new(RwLock::new(MemoryState {
                next_lease_id: 1,
                ..Default::default()
            })),
            keepalive_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Revoke a lease as if it had expired, removing its keys
    ///
    /// Returns false if the lease did not exist.
    pub async fn expire_lease(&self, lease: LeaseId) -> bool {
        self.state.write().await.revoke(lease)
    }

    /// Delete a key behind the registrar's back
    pub async fn remove_key(&self, key: &str) -> bool {
        self.state.write().await.keys.remove(key).is_some()
    }

    /// Forget every lease and key, as a store that lost its data would
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.leases.clear();
        state.keys.clear();
    }

    /// Lease currently attached to `key`
    pub async fn lease_of(&self, key: &str) -> Option<LeaseId> {
        let now_ms = self.time.now_ms();
        let mut state = self.state.write().await;
        state.purge_expired(now_ms);
        state.keys.get(key).map(|stored| stored.lease)
    }

    /// Number of unexpired leases
    pub async fn live_lease_count(&self) -> usize {
        let now_ms = self.time.now_ms();
        let mut state = self.state.write().await;
        state.purge_expired(now_ms);
        state.leases.len()
    }

    /// Number of keepalive streams that have not been dropped
    pub fn active_keepalive_count(&self) -> usize {
        self.keepalive_streams.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn grant_lease(&self, ttl_secs: i64) -> StoreResult<LeaseId> {
        if !(1..=LEASE_TTL_SECS_MAX).contains(&ttl_secs) {
            return Err(StoreError::failed(
                StoreOp::GrantLease,
                format!("ttl {} must be in 1..={}", ttl_secs, LEASE_TTL_SECS_MAX),
            ));
        }

        let now_ms = self.time.now_ms();
        let mut state = self.state.write().await;
        state.purge_expired(now_ms);

        let lease = LeaseId(state.next_lease_id);
        state.next_lease_id += 1;
        state.leases.insert(lease, LeaseEntry::new(ttl_secs, now_ms));
        Ok(lease)
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: LeaseId) -> StoreResult<()> {
        let now_ms = self.time.now_ms();
        let mut state = self.state.write().await;
        state.purge_expired(now_ms);

        if !state.leases.contains_key(&lease) {
            return Err(StoreError::failed(
                StoreOp::Put,
                format!("lease {} not found", lease),
            ));
        }
        state
            .keys
            .insert(key.to_string(), StoredValue { value, lease });
        Ok(())
    }

    async fn get(&self, key: &str, with_prefix: bool) -> StoreResult<Vec<KeyValue>> {
        let now_ms = self.time.now_ms();
        let mut state = self.state.write().await;
        state.purge_expired(now_ms);

        if !with_prefix {
            return Ok(state
                .keys
                .get(key)
                .map(|stored| vec![KeyValue::new(key, stored.value.clone())])
                .unwrap_or_default());
        }

        Ok(state
            .keys
            .range(key.to_string()..)
            .take_while(|(k, _)| k.starts_with(key))
            .map(|(k, stored)| KeyValue::new(k.clone(), stored.value.clone()))
            .collect())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let now_ms = self.time.now_ms();
        let mut state = self.state.write().await;
        state.purge_expired(now_ms);
        state.keys.remove(key);
        Ok(())
    }

    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<Box<dyn KeepAliveStream>> {
        let now_ms = self.time.now_ms();
        let mut state = self.state.write().await;
        state.purge_expired(now_ms);

        let entry = state.leases.get(&lease).copied().ok_or_else(|| {
            StoreError::failed(StoreOp::KeepAlive, format!("lease {} not found", lease))
        })?;

        Ok(Box::new(MemoryKeepAlive {
            lease,
            interval_ms: (entry.ttl_ms() / KEEPALIVE_HEARTBEATS_PER_TTL).max(1),
            time: self.time.clone(),
            state: self.state.clone(),
            _guard: StreamGuard::new(self.keepalive_streams.clone()),
        }))
    }
}

/// Counts live keepalive streams
struct StreamGuard {
    counter: Arc<AtomicUsize>,
}

impl StreamGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MemoryKeepAlive {
    lease: LeaseId,
    interval_ms: u64,
    time: Arc<dyn TimeProvider>,
    state: Arc<RwLock<MemoryState>>,
    _guard: StreamGuard,
}

#[async_trait]
impl KeepAliveStream for MemoryKeepAlive {
    async fn next_heartbeat(&mut self) -> StoreResult<Option<LeaseHeartbeat>> {
        self.time.sleep_ms(self.interval_ms).await;

        let now_ms = self.time.now_ms();
        let mut state = self.state.write().await;
        state.purge_expired(now_ms);

        match state.leases.get_mut(&self.lease) {
            Some(entry) => {
                entry.renew(now_ms);
                Ok(Some(LeaseHeartbeat {
                    lease: self.lease,
                    ttl_secs: entry.ttl_secs,
                }))
            }
            None => Ok(None),
        }
    }
}
