//! Simulation harness
//!
//! Builds a simulated world (clock, store, environment, interfaces) from a
//! seed and runs a test against it on a single-threaded runtime.

use crate::clock::SimClock;
use crate::fault::{FaultConfig, FaultInjector, FaultInjectorBuilder};
use crate::rng::DeterministicRng;
use crate::store::FaultyStore;
use perch_core::io::{duration_ms, StaticEnvironment, StaticInterfaces, TimeProvider};
use perch_registry::{
    CoordinationStore, LeaseRegistry, LeaseResolver, MemoryStore, RegistryError, RetryPolicy,
};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Clock step used when advancing simulated time
pub const SIM_STEP_MS_DEFAULT: u64 = 1_000;

/// Scheduler yields after each clock step
const SETTLE_YIELDS_COUNT: usize = 64;

/// Configuration for a simulation
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Clock step used by [`SimEnvironment::advance_ms`]
    pub step_ms: u64,
    /// Address returned by the simulated interfaces
    pub local_ip: IpAddr,
}

impl SimConfig {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            step_ms: SIM_STEP_MS_DEFAULT,
            local_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
        }
    }

    /// Seed from `DST_SEED`, or a random one
    pub fn from_env_or_random() -> Self {
        Self::new(DeterministicRng::from_env_or_random().seed())
    }

    pub fn with_step_ms(mut self, step_ms: u64) -> Self {
        assert!(step_ms > 0, "step must be positive");
        self.step_ms = step_ms;
        self
    }

    pub fn with_local_ip(mut self, ip: IpAddr) -> Self {
        self.local_ip = ip;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

/// The simulated world handed to a test
pub struct SimEnvironment {
    pub clock: Arc<SimClock>,
    pub rng: Arc<DeterministicRng>,
    /// Shared fault injector
    pub faults: Arc<FaultInjector>,
    /// Fault-free view of the store
    pub memory: MemoryStore,
    /// Store used by registrars and resolvers
    pub store: Arc<FaultyStore>,
    /// Environment read by address and TTL policies
    pub env: Arc<StaticEnvironment>,
    pub interfaces: Arc<StaticInterfaces>,
    step_ms: u64,
}

impl SimEnvironment {
    /// The store as seen by registry components
    pub fn coordination_store(&self) -> Arc<dyn CoordinationStore> {
        self.store.clone()
    }

    /// A registrar wired to the simulated world
    pub fn registry(&self, retry: RetryPolicy) -> LeaseRegistry {
        LeaseRegistry::builder(self.coordination_store())
            .with_retry_policy(retry)
            .with_environment(self.env.clone())
            .with_interfaces(self.interfaces.clone())
            .with_time(self.clock.clone())
            .build()
    }

    /// A resolver over the simulated store
    pub fn resolver(&self) -> LeaseResolver {
        LeaseResolver::new(self.coordination_store())
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Let runnable tasks make progress without moving time
    pub async fn settle(&self) {
        for _ in 0..SETTLE_YIELDS_COUNT {
            tokio::task::yield_now().await;
        }
    }

    /// Advance time in steps, settling after each
    pub async fn advance_ms(&self, ms: u64) {
        let mut remaining = ms;
        while remaining > 0 {
            let step = remaining.min(self.step_ms);
            self.clock.advance_ms(step);
            remaining -= step;
            self.settle().await;
        }
    }

    pub async fn advance(&self, duration: Duration) {
        self.advance_ms(duration_ms(duration)).await;
    }

    /// Advance until `condition` holds or `max_ms` elapse; returns whether it held
    pub async fn advance_until<F>(&self, max_ms: u64, mut condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        self.settle().await;
        let deadline = self.now_ms().saturating_add(max_ms);
        while !condition() {
            if self.now_ms() >= deadline {
                return false;
            }
            self.advance_ms(self.step_ms).await;
        }
        true
    }
}

/// Simulation runner
pub struct Simulation {
    config: SimConfig,
    fault_configs: Vec<FaultConfig>,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            fault_configs: Vec::new(),
        }
    }

    /// Register a fault active from the start
    pub fn with_fault(mut self, fault: FaultConfig) -> Self {
        self.fault_configs.push(fault);
        self
    }

    /// Run `test` in a fresh simulated world
    pub fn run<F, Fut, T>(self, test: F) -> Result<T, SimulationError>
    where
        F: FnOnce(SimEnvironment) -> Fut,
        Fut: Future<Output = Result<T, RegistryError>>,
    {
        tracing::info!(seed = self.config.seed, "Starting simulation");

        let rng = Arc::new(DeterministicRng::new(self.config.seed));
        let clock = Arc::new(SimClock::default());

        let mut fault_builder = FaultInjectorBuilder::new(rng.fork());
        for fault in self.fault_configs {
            fault_builder = fault_builder.with_fault(fault);
        }
        let faults = Arc::new(fault_builder.build());

        let memory = MemoryStore::new(clock.clone() as Arc<dyn TimeProvider>);
        let store = Arc::new(FaultyStore::new(memory.clone(), faults.clone()));

        let env = SimEnvironment {
            clock,
            rng,
            faults,
            memory,
            store,
            env: Arc::new(StaticEnvironment::new()),
            interfaces: Arc::new(StaticInterfaces::new(vec![
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                self.config.local_ip,
            ])),
            step_ms: self.config.step_ms,
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SimulationError::Runtime(e.to_string()))?;

        runtime.block_on(async { test(env).await.map_err(SimulationError::TestFailed) })
    }
}

/// Errors that can occur during simulation
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("test failed: {0}")]
    TestFailed(RegistryError),

    #[error("runtime error: {0}")]
    Runtime(String),
}
