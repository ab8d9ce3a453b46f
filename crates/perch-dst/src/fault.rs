//! Fault injection for deterministic testing
//!
//! TigerStyle: Explicit fault types, probabilistic injection.

use crate::rng::DeterministicRng;
use perch_registry::StoreOp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Types of store faults that can be injected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultType {
    /// Lease grant fails
    GrantLeaseFail,
    /// Put fails
    PutFail,
    /// Get fails
    GetFail,
    /// Delete fails
    DeleteFail,
    /// Opening a keepalive stream fails
    KeepAliveFail,
    /// The call exceeds its timeout
    Timeout,
}

impl FaultType {
    /// Get a human-readable name for this fault type
    pub fn name(&self) -> &'static str {
        match self {
            FaultType::GrantLeaseFail => "grant_lease_fail",
            FaultType::PutFail => "put_fail",
            FaultType::GetFail => "get_fail",
            FaultType::DeleteFail => "delete_fail",
            FaultType::KeepAliveFail => "keep_alive_fail",
            FaultType::Timeout => "timeout",
        }
    }

    /// Whether this fault can hit `op`
    pub fn applies_to(&self, op: StoreOp) -> bool {
        match self {
            FaultType::GrantLeaseFail => op == StoreOp::GrantLease,
            FaultType::PutFail => op == StoreOp::Put,
            FaultType::GetFail => op == StoreOp::Get,
            FaultType::DeleteFail => op == StoreOp::Delete,
            FaultType::KeepAliveFail => op == StoreOp::KeepAlive,
            FaultType::Timeout => true,
        }
    }
}

/// Configuration for a fault injection rule
#[derive(Debug, Clone)]
pub struct FaultConfig {
    pub fault_type: FaultType,
    /// Probability of injection (0.0 - 1.0)
    pub probability: f64,
    /// Restrict to one operation
    pub operation_filter: Option<StoreOp>,
    /// Only trigger after this many operations
    pub after_operations: u64,
    /// Maximum number of times to trigger
    pub max_triggers: Option<u64>,
}

impl FaultConfig {
    pub fn new(fault_type: FaultType, probability: f64) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&probability),
            "probability must be in [0, 1]"
        );

        Self {
            fault_type,
            probability,
            operation_filter: None,
            after_operations: 0,
            max_triggers: None,
        }
    }

    /// Always inject
    pub fn always(fault_type: FaultType) -> Self {
        Self::new(fault_type, 1.0)
    }

    pub fn with_filter(mut self, op: StoreOp) -> Self {
        self.operation_filter = Some(op);
        self
    }

    /// Set the number of operations to wait before triggering
    pub fn after(mut self, operations: u64) -> Self {
        self.after_operations = operations;
        self
    }

    /// Set the maximum number of triggers
    pub fn max_triggers(mut self, max: u64) -> Self {
        self.max_triggers = Some(max);
        self
    }
}

#[derive(Debug)]
struct FaultState {
    config: FaultConfig,
    trigger_count: AtomicU64,
}

/// Decides which store calls fail
///
/// Faults can be registered and cleared while a simulation runs.
#[derive(Debug)]
pub struct FaultInjector {
    faults: RwLock<Vec<FaultState>>,
    rng: DeterministicRng,
    operation_count: AtomicU64,
}

impl FaultInjector {
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            faults: RwLock::new(Vec::new()),
            rng,
            operation_count: AtomicU64::new(0),
        }
    }

    /// Register a fault configuration
    pub fn register(&self, config: FaultConfig) {
        self.write().push(FaultState {
            config,
            trigger_count: AtomicU64::new(0),
        });
    }

    /// Remove every registered fault
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Fault to inject for `op`, if any
    pub fn should_inject(&self, op: StoreOp) -> Option<FaultType> {
        let op_count = self.operation_count.fetch_add(1, Ordering::SeqCst);

        for fault_state in self.read().iter() {
            let config = &fault_state.config;

            if !config.fault_type.applies_to(op) {
                continue;
            }
            if let Some(filter) = config.operation_filter {
                if filter != op {
                    continue;
                }
            }
            if op_count < config.after_operations {
                continue;
            }
            let trigger_count = fault_state.trigger_count.load(Ordering::SeqCst);
            if let Some(max) = config.max_triggers {
                if trigger_count >= max {
                    continue;
                }
            }

            if self.rng.next_bool(config.probability) {
                fault_state.trigger_count.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(
                    fault = config.fault_type.name(),
                    operation = op.name(),
                    trigger_count = trigger_count + 1,
                    "Injecting fault"
                );
                return Some(config.fault_type.clone());
            }
        }

        None
    }

    /// Total operations checked
    pub fn operation_count(&self) -> u64 {
        self.operation_count.load(Ordering::SeqCst)
    }

    /// Total faults injected
    pub fn trigger_count(&self) -> u64 {
        self.read()
            .iter()
            .map(|state| state.trigger_count.load(Ordering::SeqCst))
            .sum()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<FaultState>> {
        self.faults
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<FaultState>> {
        self.faults
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Builder for a FaultInjector with several faults
pub struct FaultInjectorBuilder {
    rng: DeterministicRng,
    faults: Vec<FaultConfig>,
}

impl FaultInjectorBuilder {
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            rng,
            faults: Vec::new(),
        }
    }

    pub fn with_fault(mut self, config: FaultConfig) -> Self {
        self.faults.push(config);
        self
    }

    /// Read and write failures with the same probability
    pub fn with_store_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::GetFail, probability))
            .with_fault(FaultConfig::new(FaultType::PutFail, probability))
            .with_fault(FaultConfig::new(FaultType::GrantLeaseFail, probability))
    }

    pub fn build(self) -> FaultInjector {
        let injector = FaultInjector::new(self.rng);
        for fault in self.faults {
            injector.register(fault);
        }
        injector
    }
}
