//! Lease keepalive task
//!
//! A [`KeepAliveHandle`] owns one lease and the background task draining its
//! renewal stream. The task's only job is to keep consuming heartbeats until
//! its scope is cancelled or the stream ends.

use crate::error::RegistryResult;
use crate::store::{bounded, CoordinationStore, LeaseId, StoreOp};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// The active lease of a registration and its renewal scope
#[derive(Debug)]
pub struct KeepAliveHandle {
    lease: LeaseId,
    cancel_tx: watch::Sender<bool>,
}

impl KeepAliveHandle {
    /// Open a renewal stream for `lease` and start draining it
    ///
    /// Fails if the stream cannot be opened; nothing is spawned in that case.
    pub async fn start(
        store: &Arc<dyn CoordinationStore>,
        lease: LeaseId,
        call_timeout: Duration,
    ) -> RegistryResult<Self> {
        let mut stream = bounded(StoreOp::KeepAlive, call_timeout, store.keep_alive(lease)).await?;
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        tokio::spawn(async move {
            info!(lease = %lease, "Start keepalive");
            loop {
                tokio::select! {
                    biased;
                    _ = cancel_rx.changed() => {
                        info!(lease = %lease, "Stop keepalive");
                        break;
                    }
                    beat = stream.next_heartbeat() => match beat {
                        Ok(Some(beat)) => {
                            debug!(lease = %lease, ttl_secs = beat.ttl_secs, "Lease renewed");
                        }
                        Ok(None) => {
                            warn!(lease = %lease, "Keepalive stream ended, lease is gone");
                            break;
                        }
                        Err(e) => {
                            warn!(lease = %lease, error = %e, "Keepalive stream failed");
                            break;
                        }
                    }
                }
            }
        });

        Ok(Self { lease, cancel_tx })
    }

    /// The lease kept alive by this handle
    pub fn lease(&self) -> LeaseId {
        self.lease
    }

    /// Stop renewing; the lease lapses after its TTL
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }
}

impl Drop for KeepAliveHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use perch_core::io::WallClockTime;

    async fn settle(store: &MemoryStore, expected: usize) {
        for _ in 0..100 {
            if store.active_keepalive_count() == expected {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_cancel_drops_stream() {
        let memory = MemoryStore::new(Arc::new(WallClockTime::new()));
        let store: Arc<dyn CoordinationStore> = Arc::new(memory.clone());
        let lease = store.grant_lease(60).await.unwrap();

        let handle = KeepAliveHandle::start(&store, lease, Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(handle.lease(), lease);
        assert_eq!(memory.active_keepalive_count(), 1);

        handle.cancel();
        settle(&memory, 0).await;
        assert_eq!(memory.active_keepalive_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_cancels() {
        let memory = MemoryStore::new(Arc::new(WallClockTime::new()));
        let store: Arc<dyn CoordinationStore> = Arc::new(memory.clone());
        let lease = store.grant_lease(60).await.unwrap();

        let handle = KeepAliveHandle::start(&store, lease, Duration::from_secs(3))
            .await
            .unwrap();
        drop(handle);
        settle(&memory, 0).await;
        assert_eq!(memory.active_keepalive_count(), 0);
    }

    #[tokio::test]
    async fn test_start_fails_for_unknown_lease() {
        let memory = MemoryStore::new(Arc::new(WallClockTime::new()));
        let store: Arc<dyn CoordinationStore> = Arc::new(memory.clone());
        let result = KeepAliveHandle::start(&store, LeaseId(99), Duration::from_secs(3)).await;
        assert!(result.is_err());
        assert_eq!(memory.active_keepalive_count(), 0);
    }
}
