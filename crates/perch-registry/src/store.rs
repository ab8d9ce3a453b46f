//! Coordination store interface
//!
//! The registry only needs five operations from the store: lease grant,
//! put-with-lease, get (exact or prefix), delete and lease keepalive. Every
//! foreground call goes through [`bounded`] so a stalled store cannot hang a
//! caller or the keep-register watchdog.

use async_trait::async_trait;
use perch_core::io::duration_ms;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Lease identifier issued by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseId(pub i64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// A key/value pair returned by [`CoordinationStore::get`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A keepalive acknowledgement for a lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseHeartbeat {
    pub lease: LeaseId,
    /// Remaining TTL reported by the store after renewal
    pub ttl_secs: i64,
}

/// Store operation names, used in errors and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Connect,
    GrantLease,
    Put,
    Get,
    Delete,
    KeepAlive,
}

impl StoreOp {
    pub fn name(&self) -> &'static str {
        match self {
            StoreOp::Connect => "connect",
            StoreOp::GrantLease => "grant_lease",
            StoreOp::Put => "put",
            StoreOp::Get => "get",
            StoreOp::Delete => "delete",
            StoreOp::KeepAlive => "keep_alive",
        }
    }
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Store call failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{op} failed: {reason}")]
    Failed { op: StoreOp, reason: String },

    #[error("{op} timed out after {timeout_ms}ms")]
    Timeout { op: StoreOp, timeout_ms: u64 },
}

impl StoreError {
    pub fn failed(op: StoreOp, reason: impl Into<String>) -> Self {
        Self::Failed {
            op,
            reason: reason.into(),
        }
    }

    /// The operation that failed
    pub fn op(&self) -> StoreOp {
        match self {
            Self::Failed { op, .. } | Self::Timeout { op, .. } => *op,
        }
    }
}

/// Result type for store calls
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A stream of lease renewals
///
/// The stream must be polled continuously to keep the lease alive. Dropping
/// it stops renewal; the lease then lapses after its TTL.
#[async_trait]
pub trait KeepAliveStream: Send {
    /// Wait for the next renewal
    ///
    /// Returns `Ok(None)` once the lease no longer exists.
    async fn next_heartbeat(&mut self) -> StoreResult<Option<LeaseHeartbeat>>;
}

/// Strongly-consistent key-value store with leases
#[async_trait]
pub trait CoordinationStore: Send + Sync + fmt::Debug {
    /// Grant a lease with the given TTL
    async fn grant_lease(&self, ttl_secs: i64) -> StoreResult<LeaseId>;

    /// Write `key` attached to `lease`
    async fn put(&self, key: &str, value: Vec<u8>, lease: LeaseId) -> StoreResult<()>;

    /// Read `key`, or every key starting with it when `with_prefix` is set
    ///
    /// Results are ordered by key.
    async fn get(&self, key: &str, with_prefix: bool) -> StoreResult<Vec<KeyValue>>;

    /// Delete `key`; deleting a missing key succeeds
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Open a renewal stream for `lease`
    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<Box<dyn KeepAliveStream>>;
}

/// Run a store call with a timeout
pub async fn bounded<T, F>(op: StoreOp, timeout: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            op,
            timeout_ms: duration_ms(timeout),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_id_display_hex() {
        assert_eq!(LeaseId(255).to_string(), "ff");
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::failed(StoreOp::Put, "connection reset");
        assert_eq!(err.to_string(), "put failed: connection reset");
        assert_eq!(err.op(), StoreOp::Put);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let result: StoreResult<()> = bounded(StoreOp::Get, Duration::from_millis(3000), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert_eq!(
            result,
            Err(StoreError::Timeout {
                op: StoreOp::Get,
                timeout_ms: 3000
            })
        );
    }

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let result = bounded(StoreOp::Delete, Duration::from_secs(1), async {
            Err::<(), _>(StoreError::failed(StoreOp::Delete, "boom"))
        })
        .await;
        assert_eq!(result, Err(StoreError::failed(StoreOp::Delete, "boom")));
    }
}
