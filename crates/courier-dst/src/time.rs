//! Simulated time provider
//!
//! TigerStyle: Time is a dependency, never ambient.
//!
//! `SimTime` implements `courier_core::TimeProvider` on top of [`SimClock`].
//! A sleep advances the clock by the requested amount and yields, so
//! background loops (sweepers, resubscribe delays, registration backoff) make
//! progress without real delays.

use crate::clock::SimClock;
use async_trait::async_trait;
use courier_core::TimeProvider;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct SimTime {
    clock: Arc<SimClock>,
}

impl SimTime {
    pub fn new(clock: Arc<SimClock>) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }
}

#[async_trait]
impl TimeProvider for SimTime {
    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    async fn sleep_ms(&self, ms: u64) {
        self.clock.advance_ms(ms);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_advances_clock() {
        let clock = Arc::new(SimClock::from_millis(1000));
        let time = SimTime::new(clock.clone());

        time.sleep_ms(250).await;
        assert_eq!(time.now_ms(), 1250);
        assert_eq!(clock.now_ms(), 1250);
    }
}
