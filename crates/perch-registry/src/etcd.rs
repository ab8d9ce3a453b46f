//! etcd coordination store
//!
//! The client is cheap to clone and its calls take `&mut self`, so every
//! call works on its own clone.

use crate::error::{RegistryError, RegistryResult};
use crate::store::{
    bounded, CoordinationStore, KeepAliveStream, KeyValue, LeaseHeartbeat, LeaseId, StoreError,
    StoreOp, StoreResult,
};
use crate::tls::TlsMaterial;
use async_trait::async_trait;
use etcd_client::{
    Client, ConnectOptions, GetOptions, LeaseKeepAliveStream, LeaseKeeper, PutOptions,
};
use perch_core::constants::KEEPALIVE_HEARTBEATS_PER_TTL;
use perch_core::StoreConfig;
use std::fmt;
use std::time::Duration;
use tracing::info;

/// [`CoordinationStore`] backed by an etcd cluster
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    endpoints: Vec<String>,
}

impl fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtcdStore")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl EtcdStore {
    /// Connect using endpoints, credentials and timeouts from `config`
    pub async fn connect(config: &StoreConfig) -> RegistryResult<Self> {
        config.validate()?;

        let mut options = ConnectOptions::new();
        if let Some(dial_timeout_ms) = config.dial_timeout_ms {
            options = options.with_connect_timeout(Duration::from_millis(dial_timeout_ms));
        }
        if let Some(auth) = &config.auth {
            options = options.with_user(auth.username.clone(), auth.password.clone());
        }
        if let Some(tls) = &config.tls {
            options = options.with_tls(TlsMaterial::load(tls)?.into_tls_options());
        }

        let connect_timeout = Duration::from_millis(
            config.dial_timeout_ms.unwrap_or(config.call_timeout_ms),
        );
        let client = bounded(StoreOp::Connect, connect_timeout, async {
            Client::connect(&config.endpoints, Some(options))
                .await
                .map_err(|e| failed(StoreOp::Connect, e))
        })
        .await
        .map_err(RegistryError::from)?;

        info!(endpoints = ?config.endpoints, "Connected to etcd");
        Ok(Self {
            client,
            endpoints: config.endpoints.clone(),
        })
    }
}

fn failed(op: StoreOp, e: etcd_client::Error) -> StoreError {
    StoreError::failed(op, e.to_string())
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn grant_lease(&self, ttl_secs: i64) -> StoreResult<LeaseId> {
        let response = self
            .client
            .clone()
            .lease_grant(ttl_secs, None)
            .await
            .map_err(|e| failed(StoreOp::GrantLease, e))?;
        Ok(LeaseId(response.id()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: LeaseId) -> StoreResult<()> {
        self.client
            .clone()
            .put(key, value, Some(PutOptions::new().with_lease(lease.0)))
            .await
            .map_err(|e| failed(StoreOp::Put, e))?;
        Ok(())
    }

    async fn get(&self, key: &str, with_prefix: bool) -> StoreResult<Vec<KeyValue>> {
        let options = with_prefix.then(|| GetOptions::new().with_prefix());
        let response = self
            .client
            .clone()
            .get(key, options)
            .await
            .map_err(|e| failed(StoreOp::Get, e))?;
        Ok(response
            .kvs()
            .iter()
            .map(|kv| KeyValue::new(String::from_utf8_lossy(kv.key()), kv.value()))
            .collect())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.client
            .clone()
            .delete(key, None)
            .await
            .map_err(|e| failed(StoreOp::Delete, e))?;
        Ok(())
    }

    async fn keep_alive(&self, lease: LeaseId) -> StoreResult<Box<dyn KeepAliveStream>> {
        let (keeper, stream) = self
            .client
            .clone()
            .lease_keep_alive(lease.0)
            .await
            .map_err(|e| failed(StoreOp::KeepAlive, e))?;
        Ok(Box::new(EtcdKeepAlive {
            lease,
            keeper,
            stream,
            interval: None,
        }))
    }
}

/// Renews immediately, then every third of the TTL the server reports
struct EtcdKeepAlive {
    lease: LeaseId,
    keeper: LeaseKeeper,
    stream: LeaseKeepAliveStream,
    interval: Option<Duration>,
}

#[async_trait]
impl KeepAliveStream for EtcdKeepAlive {
    async fn next_heartbeat(&mut self) -> StoreResult<Option<LeaseHeartbeat>> {
        if let Some(interval) = self.interval {
            tokio::time::sleep(interval).await;
        }

        self.keeper
            .keep_alive()
            .await
            .map_err(|e| failed(StoreOp::KeepAlive, e))?;
        let response = self
            .stream
            .message()
            .await
            .map_err(|e| failed(StoreOp::KeepAlive, e))?;

        match response {
            Some(response) if response.ttl() > 0 => {
                let secs = (response.ttl() as u64 / KEEPALIVE_HEARTBEATS_PER_TTL).max(1);
                self.interval = Some(Duration::from_secs(secs));
                Ok(Some(LeaseHeartbeat {
                    lease: self.lease,
                    ttl_secs: response.ttl(),
                }))
            }
            _ => Ok(None),
        }
    }
}
