//! Perch DST - Deterministic Simulation Testing
//!
//! Runs the registry against a simulated clock and an in-memory store with
//! injected faults, so lease expiry, self-healing and give-up behaviour can
//! be exercised in milliseconds and replayed from a seed.
//!
//! # Example
//!
//! ```rust,ignore
//! use perch_dst::{FaultConfig, FaultType, SimConfig, Simulation};
//!
//! #[test]
//! fn test_with_faults() {
//!     let config = SimConfig::from_env_or_random();
//!     Simulation::new(config)
//!         .with_fault(FaultConfig::new(FaultType::GetFail, 0.1))
//!         .run(|env| async move {
//!             let registry = env.registry(RetryPolicy::new());
//!             // ...
//!             Ok(())
//!         })
//!         .unwrap();
//! }
//! ```
//!
//! # TigerStyle
//!
//! - All randomness flows from one seed, which is always logged
//! - Time moves only when the test advances it

pub mod clock;
pub mod fault;
pub mod rng;
pub mod simulation;
pub mod store;

pub use clock::SimClock;
pub use fault::{FaultConfig, FaultInjector, FaultInjectorBuilder, FaultType};
pub use rng::DeterministicRng;
pub use simulation::{SimConfig, SimEnvironment, Simulation, SimulationError};
pub use store::FaultyStore;
