//! Courier Registry
//!
//! Sticky user-to-instance assignment over a pool of heartbeating workers.
//!
//! # Overview
//!
//! - [`HeartbeatReporter`]: runs inside each worker, refreshes its TTL record
//! - [`LivenessOracle`]: alive iff the heartbeat is present and fresh
//! - [`InstanceRegistry`]: registration, sticky assignment with bounded
//!   random fallback, idempotent eviction with cascading release
//! - [`ExpirationListener`]: evicts eagerly when a heartbeat TTL lapses
//!
//! All state lives in the shared store behind `courier_store::StateStore`.

mod error;
mod heartbeat;
mod instance;
mod keys;
mod listener;
mod liveness;
mod registry;
mod repair;
mod stats;
#[cfg(test)]
mod test_support;

pub use error::{ExhaustionReason, RegistryError, RegistryResult};
pub use heartbeat::{HeartbeatHandle, HeartbeatReporter, HeartbeatStats};
pub use instance::{Assignment, InstanceAddress, InstanceId, InstanceStatus, UserId};
pub use keys::{KeySchema, ParsedKey};
pub use listener::{ExpirationListener, ExpirationOutcome, ListenerHandle};
pub use liveness::{DeadReason, Liveness, LivenessOracle};
pub use registry::{EvictionReport, InstanceRegistry};
pub use repair::ReconcileReport;
pub use stats::{RegistryStats, RegistryStatsSnapshot};
