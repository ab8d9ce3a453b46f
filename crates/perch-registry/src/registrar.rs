//! Lease-bound registration
//!
//! `register` grants a lease, writes the instance key under it, keeps the
//! lease alive and spawns a keep-register watchdog. `deregister` deletes the
//! key and stops both background tasks.

use crate::address::{AddressPolicy, Endpoint};
use crate::error::{RegistryError, RegistryResult};
use crate::instance::InstanceRecord;
use crate::keepalive::KeepAliveHandle;
use crate::key::KeySchema;
use crate::retry::RetryPolicy;
use crate::store::{bounded, CoordinationStore, LeaseId, StoreOp};
use crate::watchdog::keep_register;
use async_trait::async_trait;
use perch_core::constants::{
    ENV_LEASE_TTL, KEY_SEPARATOR, LEASE_TTL_SECS_DEFAULT, LEASE_TTL_SECS_MAX,
    SERVICE_NAME_LENGTH_BYTES_MAX,
};
use perch_core::io::{
    EnvironmentReader, NetworkInterfaces, ProcessEnvironment, SystemInterfaces, TimeProvider,
    WallClockTime,
};
use perch_core::PerchConfig;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

/// What a server publishes about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub service_name: String,
    /// Local listen endpoint; required
    pub endpoint: Option<Endpoint>,
    pub weight: i64,
    pub tags: BTreeMap<String, String>,
}

impl RegistrationInfo {
    pub fn new(service_name: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            service_name: service_name.into(),
            endpoint: Some(endpoint),
            weight: 0,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Server-side registration contract
#[async_trait]
pub trait Registry: Send + Sync {
    /// Publish the instance and keep it published
    async fn register(&self, info: &RegistrationInfo) -> RegistryResult<()>;

    /// Remove the instance and stop keeping it alive
    async fn deregister(&self, info: &RegistrationInfo) -> RegistryResult<()>;
}

/// Lifecycle of one registration as seen by its registrar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// Not registered through this registrar
    Unregistered,
    /// Key published and watched
    Registered,
    /// Key found missing; being re-published
    Healing,
    /// Watchdog gave up; the key lapses with its lease
    Abandoned,
}

/// Shared collaborators of a registrar and its background tasks
#[derive(Debug)]
pub(crate) struct RegistrarContext {
    pub(crate) store: Arc<dyn CoordinationStore>,
    pub(crate) schema: KeySchema,
    pub(crate) address: AddressPolicy,
    pub(crate) retry: RetryPolicy,
    pub(crate) env: Arc<dyn EnvironmentReader>,
    pub(crate) time: Arc<dyn TimeProvider>,
    pub(crate) call_timeout: Duration,
    pub(crate) lease_ttl_secs: i64,
}

impl RegistrarContext {
    /// Lease TTL, re-reading the environment override on every call
    pub(crate) fn lease_ttl_secs(&self) -> i64 {
        match self.env.non_empty_var(ENV_LEASE_TTL) {
            None => self.lease_ttl_secs,
            Some(raw) => match raw.parse::<i64>() {
                Ok(ttl) if (1..=LEASE_TTL_SECS_MAX).contains(&ttl) => ttl,
                _ => {
                    warn!(
                        value = %raw,
                        fallback = self.lease_ttl_secs,
                        "Ignoring invalid {}", ENV_LEASE_TTL
                    );
                    self.lease_ttl_secs
                }
            },
        }
    }

    pub(crate) async fn grant_lease(&self) -> RegistryResult<LeaseId> {
        let ttl_secs = self.lease_ttl_secs();
        let lease = bounded(
            StoreOp::GrantLease,
            self.call_timeout,
            self.store.grant_lease(ttl_secs),
        )
        .await?;
        Ok(lease)
    }

    pub(crate) async fn publish(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: LeaseId,
    ) -> RegistryResult<()> {
        bounded(StoreOp::Put, self.call_timeout, self.store.put(key, value, lease)).await?;
        Ok(())
    }
}

#[derive(Debug)]
struct Slot {
    current: Option<KeepAliveHandle>,
    stopped: bool,
}

/// One published key, its current lease and its watchdog's stop signal
#[derive(Debug)]
pub(crate) struct Registration {
    key: String,
    value: Vec<u8>,
    slot: Mutex<Slot>,
    state_tx: watch::Sender<RegistrationState>,
    stop_tx: watch::Sender<bool>,
}

impl Registration {
    fn new(key: String, value: Vec<u8>, handle: KeepAliveHandle) -> Self {
        let (state_tx, _) = watch::channel(RegistrationState::Registered);
        let (stop_tx, _) = watch::channel(false);
        Self {
            key,
            value,
            slot: Mutex::new(Slot {
                current: Some(handle),
                stopped: false,
            }),
            state_tx,
            stop_tx,
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn value(&self) -> &[u8] {
        &self.value
    }

    pub(crate) fn state(&self) -> RegistrationState {
        *self.state_tx.borrow()
    }

    /// Publish `state`; a stopped registration stays `Unregistered`
    pub(crate) fn set_state(&self, state: RegistrationState) {
        let slot = self.lock_slot();
        if !slot.stopped {
            self.state_tx.send_replace(state);
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.lock_slot().stopped
    }

    fn subscribe_state(&self) -> watch::Receiver<RegistrationState> {
        self.state_tx.subscribe()
    }

    fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    fn current_lease(&self) -> Option<LeaseId> {
        self.lock_slot().current.as_ref().map(KeepAliveHandle::lease)
    }

    /// Install `handle` as current, then cancel the one it replaces
    ///
    /// After `stop` the new handle is cancelled instead of installed.
    pub(crate) fn replace_handle(&self, handle: KeepAliveHandle) {
        let previous = {
            let mut slot = self.lock_slot();
            if slot.stopped {
                Some(handle)
            } else {
                slot.current.replace(handle)
            }
        };
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    /// Raise the stop signal and cancel the current keepalive
    fn stop(&self) {
        let current = {
            let mut slot = self.lock_slot();
            slot.stopped = true;
            self.state_tx.send_replace(RegistrationState::Unregistered);
            slot.current.take()
        };
        self.stop_tx.send_replace(true);
        if let Some(current) = current {
            current.cancel();
        }
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Slot> {
        // Slot holds no invariants a panicking holder could break
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// [`Registry`] over a lease-capable coordination store
///
/// Dropping the registrar stops every watchdog and keepalive it owns; the
/// published keys then lapse with their leases.
#[derive(Debug)]
pub struct LeaseRegistry {
    ctx: Arc<RegistrarContext>,
    registrations: RwLock<HashMap<String, Arc<Registration>>>,
}

impl LeaseRegistry {
    /// Registrar with process environment, system interfaces and wall clock
    pub fn new(store: Arc<dyn CoordinationStore>, retry: RetryPolicy) -> Self {
        Self::builder(store).with_retry_policy(retry).build()
    }

    pub fn builder(store: Arc<dyn CoordinationStore>) -> LeaseRegistryBuilder {
        LeaseRegistryBuilder::new(store)
    }

    /// Registrar configured from `config`
    pub fn from_config(
        store: Arc<dyn CoordinationStore>,
        config: &PerchConfig,
    ) -> RegistryResult<Self> {
        config.validate()?;
        let mut builder = Self::builder(store)
            .with_retry_policy(RetryPolicy::from(&config.retry))
            .with_lease_ttl_secs(config.registry.lease_ttl_secs)
            .with_call_timeout(Duration::from_millis(config.store.call_timeout_ms));
        if let Some(prefix) = &config.registry.key_prefix {
            builder = builder.with_key_prefix(prefix.clone());
        }
        if let Some(fixed) = &config.registry.fixed_address {
            builder = builder.with_fixed_address(Endpoint::from(fixed.clone()));
        }
        Ok(builder.build())
    }

    /// The key an instance is registered under
    pub fn key_for(&self, info: &RegistrationInfo) -> RegistryResult<String> {
        let endpoint = info
            .endpoint
            .as_ref()
            .ok_or_else(|| RegistryError::validation("missing address"))?;
        let registrable = self.ctx.address.resolve(endpoint)?;
        Ok(self
            .ctx
            .schema
            .service_key(&info.service_name, &registrable.address))
    }

    /// Current lifecycle state of `info`'s registration
    pub async fn state(&self, info: &RegistrationInfo) -> RegistrationState {
        let Ok(key) = self.key_for(info) else {
            return RegistrationState::Unregistered;
        };
        self.registrations
            .read()
            .await
            .get(&key)
            .map(|r| r.state())
            .unwrap_or(RegistrationState::Unregistered)
    }

    /// Follow state changes of `info`'s registration
    pub async fn watch_state(
        &self,
        info: &RegistrationInfo,
    ) -> Option<watch::Receiver<RegistrationState>> {
        let key = self.key_for(info).ok()?;
        self.registrations
            .read()
            .await
            .get(&key)
            .map(|r| r.subscribe_state())
    }

    /// Lease currently kept alive for `info`
    pub async fn current_lease(&self, info: &RegistrationInfo) -> Option<LeaseId> {
        let key = self.key_for(info).ok()?;
        self.registrations
            .read()
            .await
            .get(&key)
            .and_then(|r| r.current_lease())
    }

    /// Number of registrations held by this registrar
    pub async fn registration_count(&self) -> usize {
        self.registrations.read().await.len()
    }
}

fn validate_registration(info: &RegistrationInfo) -> RegistryResult<&Endpoint> {
    if info.service_name.is_empty() {
        return Err(RegistryError::validation("missing service name in register"));
    }
    if info.service_name.contains(KEY_SEPARATOR) {
        return Err(RegistryError::validation(format!(
            "service name {:?} must not contain '{}'",
            info.service_name, KEY_SEPARATOR
        )));
    }
    if info.service_name.len() > SERVICE_NAME_LENGTH_BYTES_MAX {
        return Err(RegistryError::validation(format!(
            "service name is {} bytes, max is {}",
            info.service_name.len(),
            SERVICE_NAME_LENGTH_BYTES_MAX
        )));
    }
    info.endpoint
        .as_ref()
        .ok_or_else(|| RegistryError::validation("missing address in register"))
}

#[async_trait]
impl Registry for LeaseRegistry {
    async fn register(&self, info: &RegistrationInfo) -> RegistryResult<()> {
        let endpoint = validate_registration(info)?;

        let lease = self.ctx.grant_lease().await?;
        let registrable = self.ctx.address.resolve(endpoint)?;
        let key = self
            .ctx
            .schema
            .service_key(&info.service_name, &registrable.address);
        let value = InstanceRecord::new(
            registrable.network.clone(),
            registrable.address.clone(),
            info.weight,
            info.tags.clone(),
        )
        .encode()?;
        self.ctx.publish(&key, value.clone(), lease).await?;

        let handle = KeepAliveHandle::start(&self.ctx.store, lease, self.ctx.call_timeout).await?;

        let registration = Arc::new(Registration::new(key.clone(), value, handle));
        tokio::spawn(keep_register(
            self.ctx.clone(),
            registration.clone(),
            registration.subscribe_stop(),
        ));

        let previous = self
            .registrations
            .write()
            .await
            .insert(key.clone(), registration);
        if let Some(previous) = previous {
            info!(key = %key, "Replacing previous registration");
            previous.stop();
        }

        info!(
            service = %info.service_name,
            key = %key,
            lease = %lease,
            endpoint = %registrable,
            "Registered"
        );
        Ok(())
    }

    async fn deregister(&self, info: &RegistrationInfo) -> RegistryResult<()> {
        if info.service_name.is_empty() {
            return Err(RegistryError::validation(
                "missing service name in deregister",
            ));
        }
        let endpoint = info
            .endpoint
            .as_ref()
            .ok_or_else(|| RegistryError::validation("missing address in deregister"))?;
        let registrable = self.ctx.address.resolve(endpoint)?;
        let key = self
            .ctx
            .schema
            .service_key(&info.service_name, &registrable.address);

        bounded(StoreOp::Delete, self.ctx.call_timeout, self.ctx.store.delete(&key)).await?;

        if let Some(registration) = self.registrations.write().await.remove(&key) {
            registration.stop();
        }

        info!(service = %info.service_name, key = %key, "Deregistered");
        Ok(())
    }
}

impl Drop for LeaseRegistry {
    fn drop(&mut self) {
        for registration in self.registrations.get_mut().values() {
            registration.stop();
        }
    }
}

/// Builder for [`LeaseRegistry`]
#[derive(Debug)]
pub struct LeaseRegistryBuilder {
    store: Arc<dyn CoordinationStore>,
    key_prefix: Option<String>,
    retry: RetryPolicy,
    fixed_address: Option<Endpoint>,
    lease_ttl_secs: i64,
    call_timeout: Duration,
    env: Arc<dyn EnvironmentReader>,
    interfaces: Arc<dyn NetworkInterfaces>,
    time: Arc<dyn TimeProvider>,
}

impl LeaseRegistryBuilder {
    fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            key_prefix: None,
            retry: RetryPolicy::default(),
            fixed_address: None,
            lease_ttl_secs: LEASE_TTL_SECS_DEFAULT,
            call_timeout: Duration::from_millis(
                perch_core::constants::STORE_CALL_TIMEOUT_MS_DEFAULT,
            ),
            env: Arc::new(ProcessEnvironment),
            interfaces: Arc::new(SystemInterfaces),
            time: Arc::new(WallClockTime::new()),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Register this address instead of each endpoint's own
    pub fn with_fixed_address(mut self, fixed: Endpoint) -> Self {
        self.fixed_address = Some(fixed);
        self
    }

    /// Lease TTL used when the environment does not override it
    pub fn with_lease_ttl_secs(mut self, ttl_secs: i64) -> Self {
        assert!(
            (1..=LEASE_TTL_SECS_MAX).contains(&ttl_secs),
            "lease ttl must be in 1..={}",
            LEASE_TTL_SECS_MAX
        );
        self.lease_ttl_secs = ttl_secs;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_environment(mut self, env: Arc<dyn EnvironmentReader>) -> Self {
        self.env = env;
        self
    }

    pub fn with_interfaces(mut self, interfaces: Arc<dyn NetworkInterfaces>) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub fn with_time(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = time;
        self
    }

    pub fn build(self) -> LeaseRegistry {
        let address = AddressPolicy::new(self.env.clone(), self.interfaces)
            .with_fixed_address(self.fixed_address);
        LeaseRegistry {
            ctx: Arc::new(RegistrarContext {
                store: self.store,
                schema: KeySchema::new(self.key_prefix.as_deref()),
                address,
                retry: self.retry,
                env: self.env,
                time: self.time,
                call_timeout: self.call_timeout,
                lease_ttl_secs: self.lease_ttl_secs,
            }),
            registrations: RwLock::new(HashMap::new()),
        }
    }
}
