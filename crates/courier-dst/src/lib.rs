//! Courier DST - Deterministic Simulation Testing
//!
//! Simulated clock, seeded randomness and fault injection for the registry.
//!
//! # Overview
//!
//! - Deterministic time control ([`SimClock`], [`SimTime`])
//! - Reproducible random numbers ([`DeterministicRng`])
//! - Fault injection ([`FaultInjector`]) applied by [`SimStore`]
//! - Safety invariants over store snapshots ([`InvariantChecker`])
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_dst::{FaultConfig, FaultType, SimConfig, Simulation};
//!
//! #[test]
//! fn test_with_faults() {
//!     let config = SimConfig::from_env_or_random();
//!     Simulation::new(config)
//!         .with_fault(FaultConfig::new(FaultType::StoreReadFail, 0.1))
//!         .run(|env| async move {
//!             let registry = env.registry();
//!             env.start_worker(&registry, "a").await?;
//!             env.advance_time_ms(1000);
//!             Ok(())
//!         })
//!         .unwrap();
//! }
//! ```
//!
//! # TigerStyle
//!
//! - All operations are deterministic given the same seed
//! - Always log the seed for reproducibility
//! - Explicit fault types and probabilities

pub mod clock;
pub mod fault;
pub mod invariants;
pub mod rng;
pub mod simulation;
pub mod store;
pub mod time;

pub use clock::SimClock;
pub use fault::{FaultConfig, FaultInjector, FaultInjectorBuilder, FaultStats, FaultType};
pub use invariants::{
    AssignmentsIndexed, EvictedUnavailable, Invariant, InvariantChecker, InvariantViolation,
    NoBindingToEvicted, RegistrySnapshot, ReturnedInstancesLive,
};
pub use rng::DeterministicRng;
pub use simulation::{SimConfig, SimEnvironment, SimResult, SimWorker, Simulation, SimulationError};
pub use store::SimStore;
pub use time::SimTime;
