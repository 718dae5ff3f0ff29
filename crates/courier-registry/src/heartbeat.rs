//! Heartbeat reporter
//!
//! TigerStyle: Explicit timeouts, bounded intervals, observable state.
//!
//! Each worker writes `service_heartbeat:{id} = now_ms` with a TTL on a fixed
//! period. The record is owned by the instance it describes; nothing else
//! writes it. A failed write is logged and retried on the next tick.

use crate::error::RegistryResult;
use crate::instance::InstanceId;
use crate::keys::KeySchema;
use courier_core::config::HeartbeatConfig;
use courier_core::io::IoContext;
use courier_store::{StateStore, StoreError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Counters for a running reporter
#[derive(Debug, Default)]
pub struct HeartbeatStats {
    writes_ok: AtomicU64,
    writes_failed: AtomicU64,
    last_written_ms: AtomicU64,
}

impl HeartbeatStats {
    pub fn writes_ok(&self) -> u64 {
        self.writes_ok.load(Ordering::Relaxed)
    }

    pub fn writes_failed(&self) -> u64 {
        self.writes_failed.load(Ordering::Relaxed)
    }

    /// Timestamp of the last successful write, 0 if none yet
    pub fn last_written_ms(&self) -> u64 {
        self.last_written_ms.load(Ordering::Relaxed)
    }
}

/// Writes this instance's heartbeat record
#[derive(Debug, Clone)]
pub struct HeartbeatReporter {
    store: Arc<dyn StateStore>,
    keys: KeySchema,
    instance_id: InstanceId,
    config: HeartbeatConfig,
    io: IoContext,
    stats: Arc<HeartbeatStats>,
}

impl HeartbeatReporter {
    pub fn new(
        store: Arc<dyn StateStore>,
        keys: KeySchema,
        instance_id: InstanceId,
        config: HeartbeatConfig,
        io: IoContext,
    ) -> Self {
        assert!(config.interval_ms > 0, "heartbeat interval must be positive");
        assert!(
            config.ttl_ms > config.interval_ms,
            "heartbeat ttl must exceed the interval"
        );
        assert!(
            config.write_timeout_ms < config.interval_ms,
            "heartbeat write timeout must be shorter than the interval"
        );
        Self {
            store,
            keys,
            instance_id,
            config,
            io,
            stats: Arc::new(HeartbeatStats::default()),
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn stats(&self) -> Arc<HeartbeatStats> {
        self.stats.clone()
    }

    /// Write one heartbeat, bounded by the write timeout
    ///
    /// Returns the timestamp written.
    pub async fn report_once(&self) -> RegistryResult<u64> {
        let now_ms = self.io.now_ms();
        let key = self.keys.heartbeat(&self.instance_id);
        let value = now_ms.to_string();
        let timeout = Duration::from_millis(self.config.write_timeout_ms);

        let result = match tokio::time::timeout(
            timeout,
            self.store.set_with_ttl(&key, &value, self.config.ttl_ms),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::timeout(
                "heartbeat write",
                self.config.write_timeout_ms,
            )),
        };

        match result {
            Ok(()) => {
                self.stats.writes_ok.fetch_add(1, Ordering::Relaxed);
                self.stats.last_written_ms.store(now_ms, Ordering::Relaxed);
                tracing::trace!(instance_id = %self.instance_id, now_ms, "Heartbeat written");
                Ok(now_ms)
            }
            Err(e) => {
                self.stats.writes_failed.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    /// Start periodic reporting in a background task
    ///
    /// The first heartbeat is written immediately. Missed ticks are skipped,
    /// never queued.
    pub fn start(self) -> HeartbeatHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let interval_ms = self.config.interval_ms;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                instance_id = %self.instance_id,
                interval_ms,
                ttl_ms = self.config.ttl_ms,
                "Heartbeat reporter started"
            );

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        tracing::info!(instance_id = %self.instance_id, "Heartbeat reporter shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.report_once().await {
                            tracing::warn!(
                                instance_id = %self.instance_id,
                                error = %e,
                                "Heartbeat write failed, retrying next tick"
                            );
                        }
                    }
                }
            }
        });

        HeartbeatHandle {
            handle: Some(handle),
            shutdown_tx: Some(shutdown_tx),
            stats,
        }
    }
}

/// Handle to a running [`HeartbeatReporter`]
///
/// Dropping the handle stops the reporter.
pub struct HeartbeatHandle {
    handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    stats: Arc<HeartbeatStats>,
}

impl HeartbeatHandle {
    pub fn stats(&self) -> &HeartbeatStats {
        &self.stats
    }

    /// Signal the reporter to stop
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }

    /// Stop and wait for the task to exit
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
