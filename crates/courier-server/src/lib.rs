//! Courier Server Library
//!
//! HTTP surface of the registry: route table, request/response models and
//! shared handler state.
//!
//! # Endpoints
//!
//! - `POST /registry/service/{id}?address=` - register an instance
//! - `GET /registry/user/{id}` - resolve a user's sticky assignment
//! - `DELETE /registry/service/{id}` - evict an instance
//! - `GET /registry/services` - list instances with liveness
//! - `POST /registry/reconcile` - run a repair pass
//! - `GET /health`, `GET /metrics`

pub mod api;
pub mod models;
pub mod state;

pub use api::{router, ApiError};
pub use state::AppState;
