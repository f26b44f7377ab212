//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random link and journal operations.

use linkdb_core::{ConversionPolicy, JournalOp, LinkOptions, RecordId, SegmentId};
use proptest::prelude::*;

/// Strategy for record ids in a small fixed segment, so that operations
/// collide often.
pub fn record_id_strategy(max_position: u64) -> impl Strategy<Value = RecordId> {
    (0..max_position).prop_map(|position| RecordId::new(SegmentId::new(1), position))
}

/// Strategy for journal operation kinds, biased towards PUT.
pub fn journal_op_strategy() -> impl Strategy<Value = JournalOp> {
    prop_oneof![
        3 => Just(JournalOp::Put),
        2 => Just(JournalOp::Remove),
    ]
}

/// Strategy for short index keys drawn from a small alphabet.
pub fn index_key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(b'a'..=b'c', 1..3)
}

/// Strategy for valid conversion policies with small thresholds.
pub fn policy_strategy() -> impl Strategy<Value = ConversionPolicy> {
    prop_oneof![
        Just(ConversionPolicy::embedded_only()),
        Just(ConversionPolicy::tree_only()),
        (0i32..8).prop_map(|to_tree| ConversionPolicy::new(to_tree, -1)
            .expect("Disabled lower threshold is always valid")),
        (1i32..8)
            .prop_flat_map(|to_tree| (Just(to_tree), 0..to_tree))
            .prop_map(|(to_tree, to_embedded)| ConversionPolicy::new(to_tree, to_embedded)
                .expect("Lower threshold below upper is valid")),
    ]
}

/// Strategy for collection options: set semantics, a small count cap, or
/// none.
pub fn link_options_strategy() -> impl Strategy<Value = LinkOptions> {
    let caps = prop_oneof![Just(1u32), Just(2), Just(LinkOptions::UNBOUNDED)];
    (policy_strategy(), caps).prop_map(|(policy, cap)| LinkOptions::new(policy).counter_max(cap))
}

/// One mutation of a link collection, addressing a slot in a record pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOperation {
    /// Add the pool record at this slot.
    Add(usize),
    /// Remove the pool record at this slot.
    Remove(usize),
}

impl LinkOperation {
    /// Returns the pool slot the operation addresses.
    #[must_use]
    pub fn slot(&self) -> usize {
        match self {
            Self::Add(slot) | Self::Remove(slot) => *slot,
        }
    }
}

/// Strategy for link operations over a pool of `pool` records.
pub fn link_operation_strategy(pool: usize) -> impl Strategy<Value = LinkOperation> {
    prop_oneof![
        3 => (0..pool).prop_map(LinkOperation::Add),
        2 => (0..pool).prop_map(LinkOperation::Remove),
    ]
}

/// Strategy for a sequence of link operations.
pub fn link_sequence_strategy(
    pool: usize,
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<LinkOperation>> {
    prop::collection::vec(link_operation_strategy(pool), min_ops..max_ops)
}

/// Strategy for a sequence of link operations split into transactions.
pub fn link_batches_strategy(
    pool: usize,
    max_batches: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<Vec<LinkOperation>>> {
    prop::collection::vec(link_sequence_strategy(pool, 0, max_ops), 1..max_batches)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
