//! Courier Core
//!
//! Core types, errors, constants and I/O providers for the Courier sticky
//! instance registry.
//!
//! # Overview
//!
//! Courier keeps a pool of interchangeable worker instances discoverable
//! through a shared key-value store and binds every client to exactly one
//! live instance. This crate holds what every other crate shares: limits,
//! configuration, the core error type, and the time/randomness seams used
//! for deterministic simulation.
//!
//! # TigerStyle
//!
//! - Explicit limits with big-endian naming (e.g., `INSTANCE_ID_LENGTH_BYTES_MAX`)
//! - Bounded iteration only
//! - All time and randomness injected through `IoContext`

pub mod config;
pub mod constants;
pub mod error;
pub mod io;
pub mod telemetry;

pub use config::{
    CourierConfig, HeartbeatConfig, ListenerConfig, LivenessConfig, ReadFailurePolicy,
    RegistryConfig, ServerConfig, StoreBackend, StoreConfig,
};
pub use constants::*;
pub use error::{Error, Result};
pub use io::{IoContext, RngProvider, StdRngProvider, TimeProvider, WallClockTime};
pub use telemetry::{init_telemetry, TelemetryConfig};
