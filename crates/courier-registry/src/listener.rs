//! Expiration listener
//!
//! TigerStyle: Idempotent reaction, explicit shutdown, bounded resubscribe
//! delay.
//!
//! When a heartbeat record's TTL lapses the store publishes the key name. The
//! listener keeps keys from the heartbeat family, parses the instance ID and
//! evicts eagerly. Duplicate or out-of-order notifications are harmless
//! because eviction is idempotent.

use crate::keys::ParsedKey;
use crate::registry::{EvictionReport, InstanceRegistry};
use courier_core::config::ListenerConfig;
use courier_core::io::IoContext;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What the listener did with one notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpirationOutcome {
    /// Key outside the heartbeat family
    Ignored,
    /// Heartbeat family key with an unparseable instance ID
    Malformed(String),
    Evicted(EvictionReport),
    /// Eviction failed; the next access or notification retries it
    Failed(String),
}

/// Reacts to heartbeat expirations by evicting the instance
#[derive(Debug, Clone)]
pub struct ExpirationListener {
    registry: Arc<InstanceRegistry>,
    config: ListenerConfig,
    io: IoContext,
}

impl ExpirationListener {
    pub fn new(registry: Arc<InstanceRegistry>, config: ListenerConfig, io: IoContext) -> Self {
        assert!(
            config.resubscribe_delay_ms > 0,
            "resubscribe delay must be positive"
        );
        Self {
            registry,
            config,
            io,
        }
    }

    /// Handle a single expired key
    pub async fn handle_expired_key(&self, key: &str) -> ExpirationOutcome {
        let instance_id = match self.registry.keys().parse_heartbeat(key) {
            ParsedKey::Valid(id) => id,
            ParsedKey::Malformed(raw) => {
                tracing::warn!(key = %key, "Expired heartbeat key has a malformed instance ID");
                return ExpirationOutcome::Malformed(raw);
            }
            ParsedKey::Foreign => {
                tracing::trace!(key = %key, "Ignoring expiration");
                return ExpirationOutcome::Ignored;
            }
        };

        self.registry.stats_handle().record_expiration();
        match self.registry.evict_instance(&instance_id).await {
            Ok(report) => {
                tracing::info!(
                    instance_id = %instance_id,
                    users_released = report.users_released,
                    "Heartbeat expired, instance evicted"
                );
                ExpirationOutcome::Evicted(report)
            }
            Err(e) => {
                tracing::warn!(instance_id = %instance_id, error = %e, "Eviction after expiration failed");
                ExpirationOutcome::Failed(e.to_string())
            }
        }
    }

    /// Consume notifications until shutdown, resubscribing when the stream ends
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let mut stream = match self.registry.store.subscribe_expirations().await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_ms = self.config.resubscribe_delay_ms,
                        "Expiration subscription failed"
                    );
                    if self.wait_or_shutdown(&mut shutdown_rx).await {
                        break;
                    }
                    continue;
                }
            };
            tracing::info!("Expiration listener subscribed");

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Expiration listener shutting down");
                        return;
                    }
                    next = stream.next() => match next {
                        Some(key) => {
                            self.handle_expired_key(&key).await;
                        }
                        None => {
                            tracing::warn!(
                                retry_ms = self.config.resubscribe_delay_ms,
                                "Expiration stream ended, resubscribing"
                            );
                            break;
                        }
                    }
                }
            }

            if self.wait_or_shutdown(&mut shutdown_rx).await {
                break;
            }
        }
    }

    /// Sleep for the resubscribe delay; true if shutdown arrived first
    async fn wait_or_shutdown(&self, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = shutdown_rx.changed() => true,
            _ = self.io.sleep_ms(self.config.resubscribe_delay_ms) => *shutdown_rx.borrow(),
        }
    }

    /// Run in a background task
    pub fn spawn(self) -> ListenerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { self.run(shutdown_rx).await });
        ListenerHandle {
            handle: Some(handle),
            shutdown_tx: Some(shutdown_tx),
        }
    }
}

/// Handle to a spawned [`ExpirationListener`]
pub struct ListenerHandle {
    handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl ListenerHandle {
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

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
