//! Courier Store
//!
//! Shared state store abstraction for the Courier registry.
//!
//! # Overview
//!
//! The store is the single source of truth for instance membership,
//! addresses, heartbeats and assignments. The registry talks to it only
//! through [`StateStore`]:
//!
//! - [`MemoryStore`]: in-process, TTLs driven by the injected clock
//! - [`RedisStore`]: the production shared store

mod error;
mod memory;
mod redis_store;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::{ExpirySweeper, MemoryStore};
pub use redis_store::RedisStore;
pub use store::{ExpirationStream, LinkOutcome, LinkedWrite, StateStore};
