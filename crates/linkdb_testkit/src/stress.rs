//! Stress tests for linkdb.
//!
//! These tests verify behavior under heavy load and concurrent access.

use crate::fixtures::scenarios::{link_scenario, LinkScenario};
use linkdb_core::{CoreError, Engine};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total transactions attempted.
    pub total_ops: usize,
    /// Committed transactions.
    pub successful_ops: usize,
    /// Transactions that failed for any reason other than a conflict.
    pub failed_ops: usize,
    /// Transactions rejected with a concurrency conflict.
    pub conflicts: usize,
    /// Total duration.
    pub duration: Duration,
    /// Transactions per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, conflicts: usize, duration: Duration) -> Self {
        let total = successful + failed + conflicts;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            conflicts,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total transactions: {}", self.total_ops);
        println!("Committed: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Conflicts: {}", self.conflicts);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} tx/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Transactions per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Records each collection can link.
    pub pool: usize,
    /// Link operations per transaction.
    pub ops_per_tx: usize,
    /// Seed for the random operation mix.
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 200,
            threads: 4,
            pool: 64,
            ops_per_tx: 8,
            seed: 0x5eed,
        }
    }
}

#[derive(Default)]
struct Counters {
    successful: AtomicUsize,
    failed: AtomicUsize,
    conflicts: AtomicUsize,
}

impl Counters {
    fn count(&self, result: Result<(), CoreError>) {
        match result {
            Ok(()) => self.successful.fetch_add(1, Ordering::Relaxed),
            Err(CoreError::ConcurrencyConflict { .. }) => {
                self.conflicts.fetch_add(1, Ordering::Relaxed)
            }
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn result(&self, duration: Duration) -> StressTestResult {
        StressTestResult::new(
            self.successful.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.conflicts.load(Ordering::Relaxed),
            duration,
        )
    }
}

fn random_batch(
    engine: &Engine,
    scenario: &LinkScenario,
    rng: &mut StdRng,
    ops: usize,
) -> Result<(), CoreError> {
    engine.transaction(|tx| {
        let mut links = tx.links(scenario.collection)?;
        for _ in 0..ops {
            let rid = scenario.pool[rng.gen_range(0..scenario.pool.len())];
            if rng.gen_bool(0.6) {
                links.add(rid)?;
            } else {
                links.remove(rid)?;
            }
        }
        Ok(())
    })
}

/// Each thread mutates its own collection, in its own segment and so its
/// own tree file. No transaction should conflict.
pub fn stress_disjoint_collections(engine: &Engine, config: &StressConfig) -> StressTestResult {
    let scenarios: Vec<LinkScenario> = (0..config.threads)
        .map(|_| link_scenario(engine, config.pool))
        .collect();
    let counters = Counters::default();

    let start = Instant::now();
    thread::scope(|scope| {
        for (t, scenario) in scenarios.iter().enumerate() {
            let counters = &counters;
            scope.spawn(move || {
                let mut rng = StdRng::seed_from_u64(config.seed + t as u64);
                for _ in 0..config.operations {
                    counters.count(random_batch(engine, scenario, &mut rng, config.ops_per_tx));
                }
            });
        }
    });
    counters.result(start.elapsed())
}

/// Every thread mutates the same collection. Conflicts are expected and
/// counted.
pub fn stress_shared_collection(engine: &Engine, config: &StressConfig) -> StressTestResult {
    let scenario = link_scenario(engine, config.pool);
    let counters = Counters::default();

    let start = Instant::now();
    thread::scope(|scope| {
        for t in 0..config.threads {
            let counters = &counters;
            let scenario = &scenario;
            scope.spawn(move || {
                let mut rng = StdRng::seed_from_u64(config.seed + t as u64);
                for _ in 0..config.operations {
                    counters.count(random_batch(engine, scenario, &mut rng, config.ops_per_tx));
                }
            });
        }
    });
    counters.result(start.elapsed())
}

/// Sequential transactions of which every other one is abandoned.
pub fn stress_rollbacks(engine: &Engine, config: &StressConfig) -> StressTestResult {
    let scenario = link_scenario(engine, config.pool);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut successful = 0usize;
    let mut failed = 0usize;

    let start = Instant::now();
    for i in 0..config.operations {
        let should_fail = i % 2 == 0;
        let result = engine.transaction(|tx| {
            let mut links = tx.links(scenario.collection)?;
            for _ in 0..config.ops_per_tx {
                links.add(scenario.pool[rng.gen_range(0..scenario.pool.len())])?;
            }
            if should_fail {
                Err(CoreError::transaction_aborted("intentional"))
            } else {
                Ok(())
            }
        });
        match result {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }
    StressTestResult::new(successful, failed, 0, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestEngine;
    use linkdb_core::{ConversionPolicy, Representation};

    fn small() -> StressConfig {
        StressConfig {
            operations: 50,
            threads: 4,
            pool: 32,
            ops_per_tx: 6,
            seed: 7,
        }
    }

    #[test]
    fn test_disjoint_collections() {
        let test_engine = TestEngine::with_policy(ConversionPolicy::new(8, 3).unwrap());
        let result = stress_disjoint_collections(&test_engine, &small());
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.conflicts, 0);
        assert_eq!(result.successful_ops, 200);
    }

    #[test]
    fn test_shared_collection() {
        for policy in [ConversionPolicy::embedded_only(), ConversionPolicy::tree_only()] {
            let test_engine = TestEngine::with_policy(policy);
            let result = stress_shared_collection(&test_engine, &small());
            assert_eq!(result.failed_ops, 0);
            assert_eq!(result.total_ops, 200);
            assert!(result.successful_ops > 0);
            assert_eq!(test_engine.stats().conflicts as usize, result.conflicts);
        }
    }

    #[test]
    fn test_rollbacks_leave_no_trees() {
        let test_engine = TestEngine::with_policy(ConversionPolicy::tree_only());
        let baseline = test_engine.live_pages();
        let config = StressConfig {
            operations: 20,
            ..small()
        };
        let result = stress_rollbacks(&test_engine, &config);
        assert_eq!(result.successful_ops, 10);
        assert_eq!(result.failed_ops, 10);
        assert_eq!(test_engine.active_transactions(), 0);
        // One committed tree, whatever the number of speculative ones.
        let trees = test_engine.stats().trees_created - test_engine.stats().trees_released;
        assert_eq!(trees, 1);
        assert!(test_engine.live_pages() > baseline);
        assert_eq!(test_engine.link_collection_count(), 1);
        assert!(matches!(
            test_engine.link_representation(linkdb_core::CollectionId::new(1)),
            Some(Representation::TreeBacked { .. })
        ));
    }
}
