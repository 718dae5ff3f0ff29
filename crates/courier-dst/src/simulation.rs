//! Simulation harness for deterministic testing
//!
//! TigerStyle: Reproducible test execution with explicit configuration.
//!
//! A run builds one seeded RNG, one simulated clock and one fault injector,
//! then wires them into a [`SimStore`] and the registry components under test.
//! Tests run on a current-thread runtime; with the same seed and the same
//! sequence of awaits, candidate draws and injected faults repeat exactly.

use crate::clock::SimClock;
use crate::fault::{FaultConfig, FaultInjector, FaultInjectorBuilder};
use crate::invariants::{InvariantChecker, InvariantViolation, RegistrySnapshot};
use crate::rng::{seed_from_env_or_random, DeterministicRng};
use crate::store::SimStore;
use crate::time::SimTime;
use courier_core::{
    CourierConfig, HeartbeatConfig, IoContext, ReadFailurePolicy, RngProvider, TimeProvider,
    DST_TIME_MS_MAX,
};
use courier_registry::{
    ExpirationListener, HeartbeatReporter, InstanceAddress, InstanceId, InstanceRegistry,
    RegistryError, RegistryResult,
};
use courier_store::{MemoryStore, StoreError, StoreResult};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Configuration for a simulation
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Maximum simulated time in milliseconds
    pub max_time_ms: u64,
    /// Registry configuration under test
    pub courier: CourierConfig,
}

impl SimConfig {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_time_ms: DST_TIME_MS_MAX,
            courier: CourierConfig::default(),
        }
    }

    /// Seed from `DST_SEED` or random, logged for replay
    pub fn from_env_or_random() -> Self {
        Self::new(seed_from_env_or_random())
    }

    pub fn with_max_time_ms(mut self, ms: u64) -> Self {
        self.max_time_ms = ms;
        self
    }

    pub fn with_read_failure_policy(mut self, policy: ReadFailurePolicy) -> Self {
        self.courier.liveness.read_failure_policy = policy;
        self
    }

    pub fn with_staleness_threshold_ms(mut self, threshold_ms: u64) -> Self {
        self.courier.liveness.staleness_threshold_ms = threshold_ms;
        self
    }

    pub fn with_selection_attempts(mut self, attempts: u32) -> Self {
        self.courier.registry.selection_attempts_max = attempts;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.courier.heartbeat = heartbeat;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Errors from a simulation run
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    InvariantViolated(#[from] InvariantViolation),

    #[error("test failed: {0}")]
    TestFailed(String),

    #[error("simulated time {elapsed_ms}ms exceeded limit {limit_ms}ms")]
    TimeLimitExceeded { elapsed_ms: u64, limit_ms: u64 },

    #[error("runtime error: {0}")]
    RuntimeError(String),
}

impl SimulationError {
    pub fn test_failed(message: impl Into<String>) -> Self {
        Self::TestFailed(message.into())
    }
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Environment provided to simulation tests
pub struct SimEnvironment {
    pub clock: Arc<SimClock>,
    pub rng: Arc<DeterministicRng>,
    /// Simulated time and RNG for every component
    pub io_context: IoContext,
    /// Fault-injecting store shared by all components
    pub store: Arc<SimStore>,
    pub faults: Arc<FaultInjector>,
    pub config: CourierConfig,
    checker: Arc<InvariantChecker>,
}

impl SimEnvironment {
    pub fn fork_rng(&self) -> Arc<DeterministicRng> {
        Arc::new(self.rng.fork())
    }

    pub fn advance_time_ms(&self, ms: u64) {
        self.clock.advance_ms(ms);
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Advance time, then let the store expire every lapsed key
    ///
    /// Returns the number of keys expired. Subscribers see one notification
    /// per key, subject to notification faults.
    pub async fn advance_and_expire(&self, ms: u64) -> usize {
        self.clock.advance_ms(ms);
        let expired = self.store.inner().sweep_expired().await;
        tokio::task::yield_now().await;
        expired
    }

    /// Registry on the simulated store with the run's configuration
    pub fn registry(&self) -> Arc<InstanceRegistry> {
        Arc::new(InstanceRegistry::from_config(
            self.store.clone(),
            &self.config,
            self.io_context.clone(),
        ))
    }

    /// Heartbeat reporter for one instance on the simulated store
    pub fn reporter(&self, instance_id: &InstanceId) -> HeartbeatReporter {
        HeartbeatReporter::new(
            self.store.clone(),
            courier_registry::KeySchema::new(self.config.store.key_namespace.clone()),
            instance_id.clone(),
            self.config.heartbeat,
            self.io_context.clone(),
        )
    }

    pub fn listener(&self, registry: Arc<InstanceRegistry>) -> ExpirationListener {
        ExpirationListener::new(registry, self.config.listener, self.io_context.clone())
    }

    /// Register an instance and write its first heartbeat
    pub async fn start_worker(
        &self,
        registry: &InstanceRegistry,
        name: &str,
    ) -> RegistryResult<SimWorker> {
        let instance_id = InstanceId::new(name)?;
        let address = InstanceAddress::new(format!("ws://{}.sim:8080/ws", name))?;
        let reporter = self.reporter(&instance_id);
        reporter.report_once().await?;
        registry.register_instance(&instance_id, &address).await?;
        Ok(SimWorker {
            instance_id,
            address,
            reporter,
        })
    }

    /// Snapshot of the store, read past any injected faults
    pub async fn snapshot(&self) -> StoreResult<RegistrySnapshot> {
        let keys = courier_registry::KeySchema::new(self.config.store.key_namespace.clone());
        Ok(
            RegistrySnapshot::capture(self.store.inner(), &keys, self.now_ms())
                .await?
                .with_staleness_threshold_ms(self.config.liveness.staleness_threshold_ms),
        )
    }

    /// Verify the run's invariants against a snapshot
    pub fn verify(&self, snapshot: &RegistrySnapshot) -> Result<(), InvariantViolation> {
        self.checker.verify_all(snapshot)
    }
}

/// A simulated worker: identity, address and heartbeat reporter
#[derive(Debug, Clone)]
pub struct SimWorker {
    pub instance_id: InstanceId,
    pub address: InstanceAddress,
    pub reporter: HeartbeatReporter,
}

impl SimWorker {
    /// Write one heartbeat at the current simulated time
    pub async fn beat(&self) -> RegistryResult<u64> {
        self.reporter.report_once().await
    }
}

/// Main simulation harness
pub struct Simulation {
    config: SimConfig,
    fault_configs: Vec<FaultConfig>,
    invariant_checker: Option<InvariantChecker>,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            fault_configs: Vec::new(),
            invariant_checker: None,
        }
    }

    pub fn with_fault(mut self, fault: FaultConfig) -> Self {
        self.fault_configs.push(fault);
        self
    }

    pub fn with_faults(mut self, faults: Vec<FaultConfig>) -> Self {
        self.fault_configs.extend(faults);
        self
    }

    /// Invariants for [`SimEnvironment::verify`]; standard set if not given
    pub fn with_invariants(mut self, checker: InvariantChecker) -> Self {
        self.invariant_checker = Some(checker);
        self
    }

    /// Run on a fresh current-thread runtime
    pub fn run<F, Fut, T>(self, test: F) -> SimResult<T>
    where
        F: FnOnce(SimEnvironment) -> Fut,
        Fut: Future<Output = SimResult<T>>,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SimulationError::RuntimeError(e.to_string()))?;
        runtime.block_on(self.run_async(test))
    }

    /// Run inside an existing async context
    pub async fn run_async<F, Fut, T>(self, test: F) -> SimResult<T>
    where
        F: FnOnce(SimEnvironment) -> Fut,
        Fut: Future<Output = SimResult<T>>,
    {
        let seed = self.config.seed;
        let max_time_ms = self.config.max_time_ms;
        let (env, clock) = self.build();
        let start_ms = clock.now_ms();

        tracing::debug!(seed, "Starting simulation");
        let result = test(env).await;

        let elapsed_ms = clock.now_ms().saturating_sub(start_ms);
        if elapsed_ms > max_time_ms {
            return Err(SimulationError::TimeLimitExceeded {
                elapsed_ms,
                limit_ms: max_time_ms,
            });
        }
        if let Err(e) = &result {
            tracing::error!(seed, error = %e, "Simulation failed (set DST_SEED={} to replay)", seed);
        }
        result
    }

    fn build(self) -> (SimEnvironment, Arc<SimClock>) {
        let rng = Arc::new(DeterministicRng::new(self.config.seed));
        let clock = Arc::new(SimClock::default());

        let mut fault_builder = FaultInjectorBuilder::new(rng.fork());
        for fault in self.fault_configs {
            fault_builder = fault_builder.with_fault(fault);
        }
        let faults = Arc::new(fault_builder.build());

        let io_context = IoContext {
            time: Arc::new(SimTime::new(clock.clone())) as Arc<dyn TimeProvider>,
            rng: Arc::new(rng.fork()) as Arc<dyn RngProvider>,
        };

        let store = Arc::new(SimStore::new(
            MemoryStore::with_io(io_context.clone()),
            faults.clone(),
            rng.fork(),
            io_context.clone(),
        ));

        let checker = self
            .invariant_checker
            .unwrap_or_else(|| InvariantChecker::new().with_standard_invariants());

        let env = SimEnvironment {
            clock: clock.clone(),
            rng,
            io_context,
            store,
            faults,
            config: self.config.courier,
            checker: Arc::new(checker),
        };
        (env, clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultType;
    use courier_registry::UserId;

    #[test]
    fn test_simulation_basic() {
        let result = Simulation::new(SimConfig::new(42)).run(|env| async move {
            let start = env.now_ms();
            env.advance_time_ms(1000);
            assert_eq!(env.now_ms() - start, 1000);
            Ok(())
        });
        assert!(result.is_ok());
    }

    #[test]
    fn test_same_seed_same_draws() {
        let draws = |seed| {
            Simulation::new(SimConfig::new(seed))
                .run(|env| async move {
                    let registry = env.registry();
                    for name in ["a", "b", "c", "d"] {
                        env.start_worker(&registry, name).await?;
                    }
                    let mut bound = Vec::new();
                    for i in 0..16 {
                        let user = UserId::new(format!("u{}", i))?;
                        bound.push(registry.get_assignment(&user).await?.instance_id);
                    }
                    Ok(bound)
                })
                .unwrap()
        };
        assert_eq!(draws(7), draws(7));
    }

    #[test]
    fn test_faults_reach_the_store() {
        let result = Simulation::new(SimConfig::new(1))
            .with_fault(FaultConfig::new(FaultType::StoreWriteFail, 1.0))
            .run(|env| async move {
                let registry = env.registry();
                let err = env.start_worker(&registry, "a").await.unwrap_err();
                assert!(err.is_retriable());
                Ok(env.faults.total_triggers())
            });
        assert_eq!(result.unwrap(), 1);
    }

    #[test]
    fn test_time_limit() {
        let result = Simulation::new(SimConfig::new(1).with_max_time_ms(100)).run(|env| async move {
            env.advance_time_ms(101);
            Ok(())
        });
        assert!(matches!(
            result,
            Err(SimulationError::TimeLimitExceeded { .. })
        ));
    }

    #[test]
    fn test_test_failure_propagates() {
        let result: SimResult<()> = Simulation::new(SimConfig::new(1))
            .run(|_env| async move { Err(SimulationError::test_failed("boom")) });
        assert!(matches!(result, Err(SimulationError::TestFailed(m)) if m == "boom"));
    }
}
