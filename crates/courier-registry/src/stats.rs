//! Process-local registry counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated by the registry and listener
#[derive(Debug, Default)]
pub struct RegistryStats {
    registrations: AtomicU64,
    assignments_cached: AtomicU64,
    assignments_bound: AtomicU64,
    assignment_failures: AtomicU64,
    dead_candidates: AtomicU64,
    evictions: AtomicU64,
    users_released: AtomicU64,
    store_errors_absorbed: AtomicU64,
    expirations_handled: AtomicU64,
}

/// Point-in-time copy of [`RegistryStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStatsSnapshot {
    pub registrations: u64,
    pub assignments_cached: u64,
    pub assignments_bound: u64,
    pub assignment_failures: u64,
    pub dead_candidates: u64,
    pub evictions: u64,
    pub users_released: u64,
    pub store_errors_absorbed: u64,
    pub expirations_handled: u64,
}

impl RegistryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_registration(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.assignments_cached.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bound(&self) {
        self.assignments_bound.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.assignment_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dead_candidate(&self) {
        self.dead_candidates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self, users_released: u64) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.users_released
            .fetch_add(users_released, Ordering::Relaxed);
    }

    pub(crate) fn record_absorbed_error(&self) {
        self.store_errors_absorbed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_expiration(&self) {
        self.expirations_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            registrations: self.registrations.load(Ordering::Relaxed),
            assignments_cached: self.assignments_cached.load(Ordering::Relaxed),
            assignments_bound: self.assignments_bound.load(Ordering::Relaxed),
            assignment_failures: self.assignment_failures.load(Ordering::Relaxed),
            dead_candidates: self.dead_candidates.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            users_released: self.users_released.load(Ordering::Relaxed),
            store_errors_absorbed: self.store_errors_absorbed.load(Ordering::Relaxed),
            expirations_handled: self.expirations_handled.load(Ordering::Relaxed),
        }
    }
}
