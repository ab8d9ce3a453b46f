//! Perch Registry
//!
//! Lease-bound service registration and discovery over a coordination store.
//!
//! # Overview
//!
//! A server registers each instance as `prefix/service/address` holding a
//! JSON [`InstanceRecord`], attached to a lease that is kept alive in the
//! background. If the process dies the lease expires and the key disappears.
//! A keep-register watchdog re-publishes the key when it goes missing while
//! the process is still alive.
//!
//! Clients list every key under `prefix/service/` to resolve live instances
//! and diff successive snapshots.
//!
//! - [`LeaseRegistry`] implements [`Registry`] (register/deregister)
//! - [`LeaseResolver`] implements [`Resolver`] (resolve/diff)
//! - [`MemoryStore`] is an in-process [`CoordinationStore`]; `EtcdStore`
//!   (feature `etcd`) talks to an etcd cluster
//!
//! # Example
//!
//! ```rust,ignore
//! use perch_registry::{Endpoint, LeaseRegistry, RegistrationInfo, Registry, RetryPolicy};
//!
//! let registry = LeaseRegistry::new(store.clone(), RetryPolicy::new());
//! let info = RegistrationInfo::new("hello", Endpoint::tcp(":8888")).with_weight(10);
//! registry.register(&info).await?;
//! ```

pub mod address;
pub mod discovery;
pub mod error;
#[cfg(feature = "etcd")]
pub mod etcd;
pub mod instance;
pub mod keepalive;
pub mod key;
pub mod memory;
pub mod registrar;
pub mod resolver;
pub mod retry;
pub mod store;
pub mod tls;
pub mod watchdog;

pub use address::{AddressPolicy, Endpoint};
pub use discovery::{diff, Change, DiscoveryResult, Instance};
pub use error::{RegistryError, RegistryResult};
#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;
pub use instance::InstanceRecord;
pub use keepalive::KeepAliveHandle;
pub use key::KeySchema;
pub use memory::MemoryStore;
pub use registrar::{LeaseRegistry, LeaseRegistryBuilder, RegistrationInfo, RegistrationState, Registry};
pub use resolver::{LeaseResolver, Resolver};
pub use retry::RetryPolicy;
pub use store::{
    bounded, CoordinationStore, KeepAliveStream, KeyValue, LeaseHeartbeat, LeaseId, StoreError,
    StoreOp, StoreResult,
};
pub use tls::TlsMaterial;
pub use watchdog::{Observation, Watchdog, WatchdogState};
