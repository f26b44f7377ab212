//! Engine statistics.
//!
//! Counters for transactions, conflicts, representation conversions and tree
//! lifecycle.
//!
//! # Usage
//!
//! ```rust
//! use linkdb_core::Engine;
//!
//! let engine = Engine::open_in_memory().unwrap();
//! let stats = engine.stats();
//! assert_eq!(stats.transactions_committed, 0);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Engine statistics.
///
/// All counters are atomic and can be read while operations are in progress.
#[derive(Debug, Default)]
pub struct EngineStats {
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    conflicts: AtomicU64,
    conversions_to_tree: AtomicU64,
    conversions_to_embedded: AtomicU64,
    trees_created: AtomicU64,
    trees_released: AtomicU64,
    pages_written: AtomicU64,
}

impl EngineStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self, pages_written: usize) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
        self.pages_written
            .fetch_add(pages_written as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conversion_to_tree(&self) {
        self.conversions_to_tree.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conversion_to_embedded(&self) {
        self.conversions_to_embedded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tree_created(&self) {
        self.trees_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tree_released(&self) {
        self.trees_released.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            conversions_to_tree: self.conversions_to_tree.load(Ordering::Relaxed),
            conversions_to_embedded: self.conversions_to_embedded.load(Ordering::Relaxed),
            trees_created: self.trees_created.load(Ordering::Relaxed),
            trees_released: self.trees_released.load(Ordering::Relaxed),
            pages_written: self.pages_written.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Transactions started.
    pub transactions_started: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions rolled back, explicitly or after a failed commit.
    pub transactions_aborted: u64,
    /// Commits rejected with a concurrency conflict.
    pub conflicts: u64,
    /// Link collections converted from embedded to tree form.
    pub conversions_to_tree: u64,
    /// Link collections converted from tree to embedded form.
    pub conversions_to_embedded: u64,
    /// Trees created in the shared B-tree manager.
    pub trees_created: u64,
    /// Trees released from the shared B-tree manager.
    pub trees_released: u64,
    /// Pages written by committed atomic operations.
    pub pages_written: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = EngineStats::new();
        stats.record_transaction_start();
        stats.record_transaction_start();
        stats.record_transaction_commit(3);
        stats.record_transaction_abort();
        stats.record_conflict();
        stats.record_conversion_to_tree();

        let snap = stats.snapshot();
        assert_eq!(snap.transactions_started, 2);
        assert_eq!(snap.transactions_committed, 1);
        assert_eq!(snap.transactions_aborted, 1);
        assert_eq!(snap.conflicts, 1);
        assert_eq!(snap.conversions_to_tree, 1);
        assert_eq!(snap.pages_written, 3);
    }

    #[test]
    fn snapshot_default_is_zero() {
        assert_eq!(EngineStats::new().snapshot(), StatsSnapshot::default());
    }
}
