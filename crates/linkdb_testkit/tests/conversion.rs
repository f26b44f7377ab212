//! Differential tests of adaptive link collections against a counted map.

use linkdb_core::{ConversionPolicy, LinkOptions};
use linkdb_storage::PageStore;
use linkdb_testkit::prelude::*;
use proptest::prelude::*;

const POOL: usize = 12;

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn collection_matches_model(
        options in link_options_strategy(),
        batches in link_batches_strategy(POOL, 6, 24),
    ) {
        let test_engine = TestEngine::memory();
        let mut harness = LinkHarness::new(test_engine.engine.clone(), "Node", POOL, options);
        let baseline = test_engine.live_pages();

        for batch in &batches {
            harness.commit_batch(batch).unwrap();
            harness.verify();
            if !harness.model().tree {
                prop_assert_eq!(test_engine.live_pages(), baseline);
            }
        }
    }

    #[test]
    fn rollback_changes_nothing(
        options in link_options_strategy(),
        setup in link_sequence_strategy(POOL, 0, 20),
        abandoned in link_sequence_strategy(POOL, 1, 20),
    ) {
        let test_engine = TestEngine::memory();
        let mut harness = LinkHarness::new(test_engine.engine.clone(), "Node", POOL, options);
        harness.commit_batch(&setup).unwrap();
        let pages = test_engine.live_pages();
        let repr = test_engine.link_representation(harness.collection);

        harness.rollback_batch(&abandoned).unwrap();
        harness.verify();
        prop_assert_eq!(test_engine.live_pages(), pages);
        prop_assert_eq!(test_engine.link_representation(harness.collection), repr);
    }
}

#[test]
fn threshold_boundaries() {
    let test_engine = TestEngine::memory();
    let mut harness = LinkHarness::new(
        test_engine.engine.clone(),
        "Node",
        POOL,
        ConversionPolicy::new(7, 3).unwrap(),
    );

    let adds: Vec<_> = (0..7).map(LinkOperation::Add).collect();
    harness.commit_batch(&adds).unwrap();
    assert!(!harness.model().tree);
    harness.verify();

    harness.commit_batch(&[LinkOperation::Add(7)]).unwrap();
    assert!(harness.model().tree);
    harness.verify();

    let removes: Vec<_> = (0..4).map(LinkOperation::Remove).collect();
    harness.commit_batch(&removes).unwrap();
    assert!(harness.model().tree);
    harness.verify();

    harness.commit_batch(&[LinkOperation::Remove(4)]).unwrap();
    assert!(!harness.model().tree);
    harness.verify();

    let stats = test_engine.stats();
    assert_eq!(stats.conversions_to_tree, 1);
    assert_eq!(stats.conversions_to_embedded, 1);
    assert_eq!(stats.trees_created, 1);
    assert_eq!(stats.trees_released, 1);
}

#[test]
fn round_trip_within_one_transaction() {
    let test_engine = TestEngine::memory();
    let mut harness = LinkHarness::new(
        test_engine.engine.clone(),
        "Node",
        POOL,
        ConversionPolicy::new(3, 1).unwrap(),
    );
    let baseline = test_engine.live_pages();

    let mut ops: Vec<_> = (0..6).map(LinkOperation::Add).collect();
    ops.extend((0..5).map(LinkOperation::Remove));
    harness.commit_batch(&ops).unwrap();
    harness.verify();

    assert!(!harness.model().tree);
    assert_eq!(test_engine.live_pages(), baseline);
    assert_eq!(test_engine.stats().trees_created, 1);
    assert_eq!(test_engine.stats().trees_released, 1);
}

#[test]
fn repeated_members_count_towards_thresholds() {
    let test_engine = TestEngine::memory();
    let mut harness = LinkHarness::new(
        test_engine.engine.clone(),
        "Node",
        POOL,
        ConversionPolicy::new(3, 1).unwrap(),
    );

    harness.commit_batch(&[LinkOperation::Add(0); 3]).unwrap();
    assert!(!harness.model().tree);
    harness.verify();

    harness.commit_batch(&[LinkOperation::Add(0)]).unwrap();
    assert!(harness.model().tree);
    harness.verify();
    let pointer = test_engine
        .link_representation(harness.collection)
        .unwrap()
        .pointer()
        .unwrap();
    let tree = test_engine.engine.load_isolated_tree(pointer).unwrap();
    assert_eq!(tree.size().unwrap(), 1);

    harness.commit_batch(&[LinkOperation::Remove(0); 2]).unwrap();
    assert!(harness.model().tree);
    harness.verify();

    harness.commit_batch(&[LinkOperation::Remove(0)]).unwrap();
    assert!(!harness.model().tree);
    assert_eq!(harness.model().count(harness.pool[0]), 1);
    harness.verify();
}

#[test]
fn set_collections_ignore_repeats() {
    let test_engine = TestEngine::memory();
    let mut harness = LinkHarness::new(
        test_engine.engine.clone(),
        "Node",
        POOL,
        LinkOptions::set(ConversionPolicy::new(2, 0).unwrap()),
    );
    harness.commit_batch(&[LinkOperation::Add(0); 5]).unwrap();
    harness.verify();
    assert_eq!(harness.model().size(), 1);
    assert!(!harness.model().tree);
}

#[test]
fn tree_file_is_per_owner_segment() {
    let test_engine = TestEngine::with_policy(ConversionPolicy::tree_only());
    let a = scenarios::populated_links(&test_engine, 2, 1);
    let b = scenarios::populated_links(&test_engine, 2, 1);

    let pa = test_engine.link_representation(a.collection).unwrap().pointer().unwrap();
    let pb = test_engine.link_representation(b.collection).unwrap().pointer().unwrap();
    assert_ne!(pa.file(), pb.file());

    let store = test_engine.trees().store();
    assert_eq!(
        store.file_name(pa.file()).unwrap(),
        linkdb_core::link_file_name(a.segment)
    );
}
