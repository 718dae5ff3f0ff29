//! Fault injection for deterministic testing
//!
//! TigerStyle: Explicit fault types, probabilistic injection.
//!
//! Operation names are `{class}:{op}:{key}`, for example
//! `store_read:get:service_heartbeat:a`. Each fault type only fires for its
//! own operation class, and an optional filter narrows it further by
//! substring (an operation, a key family or a single key).

use crate::rng::DeterministicRng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Operation class for store reads
pub const OP_CLASS_STORE_READ: &str = "store_read";
/// Operation class for store writes
pub const OP_CLASS_STORE_WRITE: &str = "store_write";
/// Operation class for opening an expiration subscription
pub const OP_CLASS_SUBSCRIBE: &str = "subscribe";
/// Operation class for delivering one expiration notification
pub const OP_CLASS_EXPIRATION: &str = "expiration";

/// Types of faults that can be injected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultType {
    /// Store read returns an error
    StoreReadFail,
    /// Store write returns an error without applying
    StoreWriteFail,
    /// Store call times out without applying
    StoreTimeout,
    /// Store call is delayed on the simulated clock, then applied
    StoreLatency { min_ms: u64, max_ms: u64 },
    /// Opening the expiration subscription fails
    SubscribeFail,
    /// An expiration notification is lost
    ExpirationDrop,
    /// An expiration notification is delivered twice
    ExpirationDuplicate,
}

impl FaultType {
    pub fn name(&self) -> &'static str {
        match self {
            FaultType::StoreReadFail => "store_read_fail",
            FaultType::StoreWriteFail => "store_write_fail",
            FaultType::StoreTimeout => "store_timeout",
            FaultType::StoreLatency { .. } => "store_latency",
            FaultType::SubscribeFail => "subscribe_fail",
            FaultType::ExpirationDrop => "expiration_drop",
            FaultType::ExpirationDuplicate => "expiration_duplicate",
        }
    }

    /// Whether this fault can fire for the given operation name
    pub fn applies_to(&self, operation: &str) -> bool {
        let class = operation.split(':').next().unwrap_or_default();
        match self {
            FaultType::StoreReadFail => class == OP_CLASS_STORE_READ,
            FaultType::StoreWriteFail => class == OP_CLASS_STORE_WRITE,
            FaultType::StoreTimeout | FaultType::StoreLatency { .. } => {
                class == OP_CLASS_STORE_READ || class == OP_CLASS_STORE_WRITE
            }
            FaultType::SubscribeFail => class == OP_CLASS_SUBSCRIBE,
            FaultType::ExpirationDrop | FaultType::ExpirationDuplicate => {
                class == OP_CLASS_EXPIRATION
            }
        }
    }
}

/// Configuration for a fault injection rule
#[derive(Debug, Clone)]
pub struct FaultConfig {
    pub fault_type: FaultType,
    /// Probability of injection (0.0 - 1.0)
    pub probability: f64,
    /// Substring the operation name must contain
    pub operation_filter: Option<String>,
    /// Only trigger after this many operations
    pub after_operations: u64,
    pub max_triggers: Option<u64>,
    pub enabled: bool,
}

impl FaultConfig {
    pub fn new(fault_type: FaultType, probability: f64) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&probability),
            "probability must be in [0, 1]"
        );
        Self {
            fault_type,
            probability,
            operation_filter: None,
            after_operations: 0,
            max_triggers: None,
            enabled: true,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.operation_filter = Some(filter.into());
        self
    }

    pub fn after(mut self, operations: u64) -> Self {
        self.after_operations = operations;
        self
    }

    pub fn max_triggers(mut self, max: u64) -> Self {
        self.max_triggers = Some(max);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug)]
struct FaultState {
    config: FaultConfig,
    trigger_count: AtomicU64,
}

/// Decides, per operation, whether to inject a fault
#[derive(Debug)]
pub struct FaultInjector {
    faults: Vec<FaultState>,
    rng: DeterministicRng,
    operation_count: AtomicU64,
}

impl FaultInjector {
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            faults: Vec::new(),
            rng,
            operation_count: AtomicU64::new(0),
        }
    }

    pub fn register(&mut self, config: FaultConfig) {
        self.faults.push(FaultState {
            config,
            trigger_count: AtomicU64::new(0),
        });
    }

    /// The first registered fault that fires for `operation`, if any
    pub fn should_inject(&self, operation: &str) -> Option<FaultType> {
        let op_count = self.operation_count.fetch_add(1, Ordering::SeqCst);

        for state in &self.faults {
            let config = &state.config;
            if !config.enabled || !config.fault_type.applies_to(operation) {
                continue;
            }
            if let Some(filter) = &config.operation_filter {
                if !operation.contains(filter.as_str()) {
                    continue;
                }
            }
            if op_count < config.after_operations {
                continue;
            }
            let trigger_count = state.trigger_count.load(Ordering::SeqCst);
            if config.max_triggers.is_some_and(|max| trigger_count >= max) {
                continue;
            }

            if self.rng.next_bool(config.probability) {
                state.trigger_count.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(
                    fault = config.fault_type.name(),
                    operation = operation,
                    trigger_count = trigger_count + 1,
                    "Injecting fault"
                );
                return Some(config.fault_type.clone());
            }
        }

        None
    }

    pub fn operation_count(&self) -> u64 {
        self.operation_count.load(Ordering::SeqCst)
    }

    /// Total triggers across all registered faults
    pub fn total_triggers(&self) -> u64 {
        self.faults
            .iter()
            .map(|state| state.trigger_count.load(Ordering::SeqCst))
            .sum()
    }

    pub fn stats(&self) -> Vec<FaultStats> {
        self.faults
            .iter()
            .map(|state| FaultStats {
                fault_type: state.config.fault_type.name().to_string(),
                probability: state.config.probability,
                trigger_count: state.trigger_count.load(Ordering::SeqCst),
                enabled: state.config.enabled,
            })
            .collect()
    }

    pub fn reset(&self) {
        self.operation_count.store(0, Ordering::SeqCst);
        for state in &self.faults {
            state.trigger_count.store(0, Ordering::SeqCst);
        }
    }
}

#[derive(Debug, Clone)]
pub struct FaultStats {
    pub fault_type: String,
    pub probability: f64,
    pub trigger_count: u64,
    pub enabled: bool,
}

/// Builder for a [`FaultInjector`] with several rules
pub struct FaultInjectorBuilder {
    rng: DeterministicRng,
    faults: Vec<FaultConfig>,
}

impl FaultInjectorBuilder {
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            rng,
            faults: Vec::new(),
        }
    }

    pub fn with_fault(mut self, config: FaultConfig) -> Self {
        self.faults.push(config);
        self
    }

    /// Read and write failures at the same probability
    pub fn with_store_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::StoreReadFail, probability))
            .with_fault(FaultConfig::new(FaultType::StoreWriteFail, probability))
    }

    /// Lost and duplicated expiration notifications
    pub fn with_notification_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::ExpirationDrop, probability))
            .with_fault(FaultConfig::new(
                FaultType::ExpirationDuplicate,
                probability,
            ))
    }

    pub fn build(self) -> FaultInjector {
        let mut injector = FaultInjector::new(self.rng);
        for config in self.faults {
            injector.register(config);
        }
        injector
    }
}
