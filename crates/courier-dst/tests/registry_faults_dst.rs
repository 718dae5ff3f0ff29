//! DST tests for the registry under store faults
//!
//! TigerStyle: Faults are injected deterministically from the run seed.
//!
//! - Read-failure policy: fail-open keeps an unverifiable instance, fail-closed drops it
//! - Random read/write faults never break assignment/index agreement
//! - Concurrent first-time assignments for one user converge

use courier_core::ReadFailurePolicy;
use courier_dst::{
    FaultConfig, FaultType, InvariantChecker, ReturnedInstancesLive, SimConfig, SimEnvironment,
    SimWorker, Simulation, SimulationError,
};
use courier_registry::{ExhaustionReason, InstanceRegistry, RegistryError, UserId};
use courier_store::StateStore;
use std::collections::BTreeSet;
use std::sync::Arc;

fn user(n: u32) -> UserId {
    UserId::new(format!("user-{}", n)).unwrap()
}

/// Start a worker, retrying through injected write faults
async fn start_worker_retrying(
    env: &SimEnvironment,
    registry: &InstanceRegistry,
    name: &str,
) -> Result<SimWorker, SimulationError> {
    let mut last_err = None;
    for _ in 0..100 {
        match env.start_worker(registry, name).await {
            Ok(worker) => return Ok(worker),
            Err(e) => last_err = Some(e),
        }
    }
    Err(SimulationError::test_failed(format!(
        "worker {} never started: {:?}",
        name, last_err
    )))
}

fn heartbeat_read_fault() -> FaultConfig {
    FaultConfig::new(FaultType::StoreReadFail, 1.0).with_filter("store_read:get:service_heartbeat:")
}

// =============================================================================
// Read-Failure Policy
// =============================================================================

#[test]
fn test_dst_fail_open_keeps_unverifiable_instance() {
    let config = SimConfig::from_env_or_random().with_read_failure_policy(ReadFailurePolicy::FailOpen);

    let result = Simulation::new(config)
        .with_fault(heartbeat_read_fault())
        .run(|env| async move {
            let registry = env.registry();
            let worker = env.start_worker(&registry, "a").await?;
            // Long past the threshold, but the heartbeat cannot be read
            env.advance_time_ms(60_000);

            let assignment = registry.get_assignment(&user(1)).await?;
            assert_eq!(assignment.instance_id, worker.instance_id);
            let again = registry.get_assignment(&user(1)).await?;
            assert!(again.sticky);

            assert!(env.snapshot().await?.available.contains("a"));
            Ok(())
        });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_fail_closed_drops_unverifiable_instance() {
    let config =
        SimConfig::from_env_or_random().with_read_failure_policy(ReadFailurePolicy::FailClosed);

    let result = Simulation::new(config)
        .with_fault(heartbeat_read_fault())
        .run(|env| async move {
            let registry = env.registry();
            env.start_worker(&registry, "a").await?;

            match registry.get_assignment(&user(1)).await {
                Err(RegistryError::NoInstanceAvailable { reason, .. }) => {
                    assert_eq!(reason, ExhaustionReason::EmptyPool);
                }
                other => {
                    return Err(SimulationError::test_failed(format!(
                        "expected no instance, got {:?}",
                        other
                    )))
                }
            }
            env.verify(&env.snapshot().await?.with_evicted("a"))?;
            Ok(())
        });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_failed_draws_consume_attempts() {
    let config = SimConfig::from_env_or_random().with_selection_attempts(4);

    let result = Simulation::new(config)
        .with_fault(
            FaultConfig::new(FaultType::StoreReadFail, 1.0).with_filter("set_random_member"),
        )
        .run(|env| async move {
            let registry = env.registry();
            env.start_worker(&registry, "a").await?;

            match registry.get_assignment(&user(1)).await {
                Err(RegistryError::NoInstanceAvailable {
                    candidates_checked,
                    reason,
                    ..
                }) => {
                    assert_eq!(candidates_checked, 0);
                    assert_eq!(reason, ExhaustionReason::AttemptsExhausted);
                }
                other => {
                    return Err(SimulationError::test_failed(format!(
                        "expected exhaustion, got {:?}",
                        other
                    )))
                }
            }
            assert_eq!(registry.stats().store_errors_absorbed, 4);
            Ok(())
        });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_store_latency_can_outlast_threshold() {
    let config = SimConfig::from_env_or_random();
    let threshold_ms = config.courier.liveness.staleness_threshold_ms;

    let result = Simulation::new(config)
        .with_fault(
            FaultConfig::new(
                FaultType::StoreLatency {
                    min_ms: threshold_ms + 1,
                    max_ms: threshold_ms + 1,
                },
                1.0,
            )
            .with_filter("store_read:get:service_heartbeat:")
            .max_triggers(1),
        )
        .run(|env| async move {
            let registry = env.registry();
            env.start_worker(&registry, "a").await?;

            // The heartbeat read itself takes longer than the threshold
            assert!(registry.get_assignment(&user(1)).await.is_err());
            env.verify(&env.snapshot().await?.with_evicted("a"))?;
            Ok(())
        });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

// =============================================================================
// Random Faults
// =============================================================================

#[test]
fn test_dst_random_faults_preserve_invariants() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config)
        .with_fault(FaultConfig::new(FaultType::StoreReadFail, 0.1))
        .with_fault(FaultConfig::new(FaultType::StoreWriteFail, 0.1))
        .with_fault(FaultConfig::new(FaultType::StoreTimeout, 0.02))
        .run(|env| async move {
            let registry = env.registry();
            let mut workers = Vec::new();
            for name in ["w0", "w1", "w2", "w3"] {
                workers.push(start_worker_retrying(&env, &registry, name).await?);
            }
            let mut evicted: BTreeSet<String> = BTreeSet::new();
            let rng = env.fork_rng();

            for _step in 0..300 {
                let worker = &workers[rng.next_index(workers.len())];
                let id = worker.instance_id.as_str().to_string();

                match rng.next_index(10) {
                    0..=3 => {
                        let n = rng.next_range(0, 25) as u32;
                        if let Err(e) = registry.get_assignment(&user(n)).await {
                            assert!(
                                matches!(e, RegistryError::NoInstanceAvailable { .. }),
                                "unexpected error: {:?}",
                                e
                            );
                        }
                    }
                    4..=5 => {
                        let _ = worker.beat().await;
                    }
                    6 => {
                        if registry.evict_instance(&worker.instance_id).await.is_ok() {
                            evicted.insert(id);
                        }
                    }
                    7 => {
                        if registry
                            .register_instance(&worker.instance_id, &worker.address)
                            .await
                            .is_ok()
                        {
                            evicted.remove(&id);
                        }
                    }
                    _ => env.advance_time_ms(rng.next_range(0, 1500)),
                }

                let mut snapshot = env.snapshot().await?;
                for id in &evicted {
                    snapshot = snapshot.with_evicted(id.clone());
                }
                env.verify(&snapshot)?;
            }

            assert!(env.faults.total_triggers() > 0, "no faults were injected");
            Ok(())
        });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_reconcile_after_faults_is_clean() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config)
        .with_fault(FaultConfig::new(FaultType::StoreWriteFail, 0.2).max_triggers(40))
        .run(|env| async move {
            let registry = env.registry();
            let mut workers = Vec::new();
            for name in ["w0", "w1", "w2"] {
                workers.push(start_worker_retrying(&env, &registry, name).await?);
            }

            for n in 0..30 {
                let _ = registry.get_assignment(&user(n)).await;
                if n % 7 == 0 {
                    let _ = registry.evict_instance(&workers[(n as usize) % 3].instance_id).await;
                    let worker = &workers[(n as usize) % 3];
                    let _ = registry
                        .register_instance(&worker.instance_id, &worker.address)
                        .await;
                }
            }

            // Faults are capped, so repeated passes eventually complete clean
            let mut clean = false;
            for _ in 0..200 {
                if let Ok(report) = registry.reconcile().await {
                    if report.is_clean() {
                        clean = true;
                        break;
                    }
                }
            }
            if !clean {
                return Err(SimulationError::test_failed("reconcile never converged"));
            }

            let snapshot = env.snapshot().await?;
            env.verify(&snapshot)?;
            for (user, instance) in &snapshot.assignments {
                assert!(snapshot.available.contains(instance), "{} -> {}", user, instance);
            }
            for (instance, users) in &snapshot.reverse_index {
                for user in users {
                    assert_eq!(snapshot.assignments.get(user), Some(instance));
                }
            }
            Ok(())
        });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

#[test]
fn test_dst_returned_instances_were_live() {
    let config = SimConfig::from_env_or_random()
        .with_read_failure_policy(ReadFailurePolicy::FailClosed);

    let result = Simulation::new(config)
        .with_fault(FaultConfig::new(FaultType::StoreReadFail, 0.1))
        .with_invariants(
            InvariantChecker::new()
                .with_standard_invariants()
                .with_invariant(ReturnedInstancesLive),
        )
        .run(|env| async move {
            let registry = env.registry();
            let mut workers = Vec::new();
            for name in ["w0", "w1", "w2"] {
                workers.push(start_worker_retrying(&env, &registry, name).await?);
            }
            let rng = env.fork_rng();

            for step in 0..100 {
                env.advance_time_ms(rng.next_range(0, 800));
                for worker in &workers {
                    // w2 stops beating half way through
                    if worker.instance_id.as_str() != "w2" || step < 50 {
                        let _ = worker.beat().await;
                    }
                }

                let n = rng.next_range(0, 10) as u32;
                if let Ok(assignment) = registry.get_assignment(&user(n)).await {
                    let heartbeat = env
                        .store
                        .inner()
                        .get(&format!("service_heartbeat:{}", assignment.instance_id))
                        .await?;
                    let snapshot = env.snapshot().await?.with_returned(
                        assignment.instance_id.as_str(),
                        heartbeat,
                        env.now_ms(),
                    );
                    env.verify(&snapshot)?;
                }
            }
            Ok(())
        });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_dst_concurrent_first_assignments_converge() {
    let config = SimConfig::from_env_or_random();

    let result = Simulation::new(config).run(|env| async move {
        let registry = env.registry();
        for name in ["w0", "w1", "w2", "w3", "w4"] {
            env.start_worker(&registry, name).await?;
        }

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry: Arc<InstanceRegistry> = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.get_assignment(&user(1)).await
            }));
        }

        let mut winners = BTreeSet::new();
        for handle in handles {
            let assignment = handle
                .await
                .map_err(|e| SimulationError::test_failed(e.to_string()))??;
            winners.insert(assignment.instance_id.as_str().to_string());
        }
        assert_eq!(winners.len(), 1, "callers diverged: {:?}", winners);

        let snapshot = env.snapshot().await?;
        env.verify(&snapshot)?;
        let indexed = snapshot
            .reverse_index
            .values()
            .filter(|users| users.contains("user-1"))
            .count();
        assert_eq!(indexed, 1);
        assert_eq!(registry.stats().assignments_bound, 1);
        Ok(())
    });

    assert!(result.is_ok(), "Test failed: {:?}", result.err());
}
