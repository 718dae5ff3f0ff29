//! Deterministic clock for simulation
//!
//! TigerStyle: Explicit time control, no system time dependencies.

use chrono::{DateTime, Utc};
use courier_core::DST_CLOCK_START_MS_DEFAULT;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Deterministic simulation clock
///
/// Time only advances when told to. Heartbeat freshness, TTL deadlines and
/// backoff delays all read this clock in simulation.
#[derive(Debug, Clone)]
pub struct SimClock {
    current_time_ms: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

impl SimClock {
    /// Create a clock starting at the given time
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self::from_millis(start_time.timestamp_millis().max(0) as u64)
    }

    /// Create a clock starting at a millisecond timestamp
    pub fn from_millis(ms: u64) -> Self {
        Self {
            current_time_ms: Arc::new(AtomicU64::new(ms)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.now_ms() as i64).unwrap_or_default()
    }

    pub fn now_ms(&self) -> u64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }

    /// Advance time and wake sleepers
    pub fn advance_ms(&self, ms: u64) {
        self.current_time_ms.fetch_add(ms, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Wait until another task advances the clock past `ms` from now
    pub async fn sleep_ms(&self, ms: u64) {
        let target_ms = self.now_ms().saturating_add(ms);
        while self.now_ms() < target_ms {
            let notified = self.notify.notified();
            if self.now_ms() >= target_ms {
                break;
            }
            notified.await;
        }
    }

    pub fn is_past_ms(&self, deadline_ms: u64) -> bool {
        self.now_ms() >= deadline_ms
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::from_millis(DST_CLOCK_START_MS_DEFAULT)
    }
}
