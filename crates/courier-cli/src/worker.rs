//! Worker-side registration
//!
//! TigerStyle: Unbounded retries with capped exponential backoff, then a fixed
//! refresh so an instance dropped from the pool comes back once it is healthy.

use crate::client::CourierClient;
use async_trait::async_trait;
use courier_core::{
    IoContext, REGISTRATION_BACKOFF_MS_INITIAL, REGISTRATION_BACKOFF_MS_MAX,
    REGISTRATION_REFRESH_INTERVAL_MS_DEFAULT,
};
use courier_registry::{InstanceAddress, InstanceId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Default address advertised to clients
pub const WORKER_ADDRESS_DEFAULT: &str = "ws://localhost:8085/ws";

// =============================================================================
// Backoff
// =============================================================================

/// Doubling delay, capped
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u64,
    max_ms: u64,
    current_ms: u64,
}

impl Backoff {
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        assert!(initial_ms > 0, "initial backoff must be positive");
        assert!(initial_ms <= max_ms, "initial backoff must not exceed the cap");
        Self {
            initial_ms,
            max_ms,
            current_ms: initial_ms,
        }
    }

    /// Delay to wait now; the following one doubles up to the cap
    pub fn next_delay_ms(&mut self) -> u64 {
        let delay_ms = self.current_ms;
        self.current_ms = self.current_ms.saturating_mul(2).min(self.max_ms);
        delay_ms
    }

    pub fn reset(&mut self) {
        self.current_ms = self.initial_ms;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(REGISTRATION_BACKOFF_MS_INITIAL, REGISTRATION_BACKOFF_MS_MAX)
    }
}

// =============================================================================
// Registration Target
// =============================================================================

/// Where a worker announces itself
#[async_trait]
pub trait RegistrationTarget: Send + Sync {
    async fn register(&self, instance_id: &InstanceId, address: &InstanceAddress)
        -> anyhow::Result<()>;
}

#[async_trait]
impl RegistrationTarget for CourierClient {
    async fn register(
        &self,
        instance_id: &InstanceId,
        address: &InstanceAddress,
    ) -> anyhow::Result<()> {
        CourierClient::register(self, instance_id.as_str(), address.as_str()).await
    }
}

// =============================================================================
// Registration Task
// =============================================================================

/// Counters for the registration loop
#[derive(Debug, Default)]
pub struct RegistrationStats {
    attempts: AtomicU64,
    successes: AtomicU64,
}

impl RegistrationStats {
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }
}

/// Keeps this worker registered with the registry
pub struct RegistrationTask {
    target: Arc<dyn RegistrationTarget>,
    instance_id: InstanceId,
    address: InstanceAddress,
    refresh_interval_ms: u64,
    backoff: Backoff,
    io: IoContext,
    stats: Arc<RegistrationStats>,
}

impl RegistrationTask {
    pub fn new(
        target: Arc<dyn RegistrationTarget>,
        instance_id: InstanceId,
        address: InstanceAddress,
        io: IoContext,
    ) -> Self {
        Self {
            target,
            instance_id,
            address,
            refresh_interval_ms: REGISTRATION_REFRESH_INTERVAL_MS_DEFAULT,
            backoff: Backoff::default(),
            io,
            stats: Arc::new(RegistrationStats::default()),
        }
    }

    pub fn with_refresh_interval_ms(mut self, refresh_interval_ms: u64) -> Self {
        assert!(refresh_interval_ms > 0, "refresh interval must be positive");
        self.refresh_interval_ms = refresh_interval_ms;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// One attempt; returns how long to wait before the next
    async fn attempt(&mut self, registered: &mut bool) -> u64 {
        self.stats.attempts.fetch_add(1, Ordering::Relaxed);
        match self.target.register(&self.instance_id, &self.address).await {
            Ok(()) => {
                self.stats.successes.fetch_add(1, Ordering::Relaxed);
                self.backoff.reset();
                if !*registered {
                    tracing::info!(
                        instance_id = %self.instance_id,
                        address = %self.address,
                        "Registered with registry"
                    );
                }
                *registered = true;
                self.refresh_interval_ms
            }
            Err(e) => {
                let delay_ms = self.backoff.next_delay_ms();
                tracing::warn!(
                    instance_id = %self.instance_id,
                    error = %e,
                    retry_in_ms = delay_ms,
                    "Registration failed"
                );
                delay_ms
            }
        }
    }

    /// Run in a background task until stopped
    pub fn spawn(mut self) -> RegistrationHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();

        let handle = tokio::spawn(async move {
            let mut registered = false;
            loop {
                let delay_ms = self.attempt(&mut registered).await;
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        tracing::info!(instance_id = %self.instance_id, "Registration task shutting down");
                        break;
                    }
                    _ = self.io.sleep_ms(delay_ms) => {}
                }
            }
        });

        RegistrationHandle {
            handle: Some(handle),
            shutdown_tx: Some(shutdown_tx),
            stats,
        }
    }
}

/// Handle to a running [`RegistrationTask`]
pub struct RegistrationHandle {
    handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    stats: Arc<RegistrationStats>,
}

impl RegistrationHandle {
    pub fn stats(&self) -> &RegistrationStats {
        &self.stats
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }

    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RegistrationHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
