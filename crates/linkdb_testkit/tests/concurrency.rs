//! Concurrent transactions over trees sharing one page file.

use linkdb_core::{ConversionPolicy, CoreError, RecordId};
use linkdb_testkit::prelude::*;
use std::thread;

const THREADS: usize = 4;
const PER_THREAD: usize = 60;

#[test]
fn owners_in_one_segment_commit_independently() {
    init_test_logging();
    let test_engine = TestEngine::with_policy(ConversionPolicy::new(4, 1).unwrap());
    let segment = test_engine.create_segment("Person", false).unwrap();
    let (owners, collections, targets) = test_engine
        .transaction(|tx| {
            let owners = (0..THREADS)
                .map(|_| tx.create_record(segment))
                .collect::<Result<Vec<_>, _>>()?;
            let collections = owners
                .iter()
                .map(|owner| tx.create_link_collection(*owner))
                .collect::<Result<Vec<_>, _>>()?;
            let targets = (0..PER_THREAD)
                .map(|_| tx.create_record(segment))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((owners, collections, targets))
        })
        .unwrap();

    let engine = &test_engine.engine;
    thread::scope(|scope| {
        for (t, collection) in collections.iter().enumerate() {
            let targets = &targets;
            scope.spawn(move || {
                for (i, rid) in targets.iter().enumerate() {
                    engine
                        .transaction(|tx| {
                            let mut links = tx.links(*collection)?;
                            links.add(*rid)?;
                            // Every thread drops a different share of what it added.
                            if (i + t) % 3 == 0 {
                                links.remove(*rid)?;
                            }
                            Ok(())
                        })
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(test_engine.stats().conflicts, 0);
    for (t, collection) in collections.iter().enumerate() {
        let expected: Vec<RecordId> = targets
            .iter()
            .enumerate()
            .filter(|(i, _)| (i + t) % 3 != 0)
            .map(|(_, rid)| *rid)
            .collect();
        let repr = test_engine.link_representation(*collection).unwrap();
        assert_eq!(repr.len(), expected.len());
        let pointer = repr.pointer().expect("Collection should be tree-backed");
        let members: Vec<RecordId> = test_engine
            .load_isolated_tree(pointer)
            .unwrap()
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| e.rid)
            .collect();
        assert_eq!(members, expected);
    }

    let files: Vec<_> = collections
        .iter()
        .map(|c| test_engine.link_representation(*c).unwrap().pointer().unwrap().file())
        .collect();
    assert!(files.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(owners.len(), THREADS);
}

#[test]
fn conflicting_writers_keep_a_consistent_set() {
    let test_engine = TestEngine::with_policy(ConversionPolicy::embedded_only());
    let s = scenarios::link_scenario(&test_engine, THREADS * 10);

    let engine = &test_engine.engine;
    thread::scope(|scope| {
        for t in 0..THREADS {
            let s = &s;
            scope.spawn(move || {
                for rid in &s.pool[t * 10..(t + 1) * 10] {
                    loop {
                        match engine.transaction(|tx| tx.links(s.collection)?.add(*rid)) {
                            Ok(added) => {
                                assert!(added);
                                break;
                            }
                            Err(CoreError::ConcurrencyConflict { .. }) => continue,
                            Err(err) => panic!("unexpected error: {err}"),
                        }
                    }
                }
            });
        }
    });

    let repr = test_engine.link_representation(s.collection).unwrap();
    assert_eq!(repr.len(), THREADS * 10);
    let mut tx = test_engine.begin().unwrap();
    let mut members = tx.links(s.collection).unwrap().members().unwrap();
    members.sort();
    assert_eq!(members, s.pool);
}
