//! Commit, rollback and isolation across link collections and indexes.

use linkdb_core::{
    CommitHook, ConversionPolicy, CoreError, CoreResult, JournalEntry, JournalOp, KeyPolicy,
    LogicalId, Transaction,
};
use linkdb_storage::PageStore;
use linkdb_testkit::prelude::*;
use std::sync::Arc;

#[test]
fn commit_is_all_or_nothing() {
    init_test_logging();
    let test_engine = TestEngine::with_policy(ConversionPolicy::tree_only());
    let a = scenarios::link_scenario(&test_engine, 3);
    let b = scenarios::link_scenario(&test_engine, 3);
    let email = test_engine
        .create_index("Node.email", a.segment, true, KeyPolicy::SingleKeyPerRecord)
        .unwrap();
    test_engine
        .transaction(|tx| {
            tx.index_put(email, &"taken".to_string(), a.pool[0])?;
            Ok(())
        })
        .unwrap();
    let pages = test_engine.live_pages();
    let seq = test_engine.committed_seq();

    let mut tx = test_engine.begin().unwrap();
    tx.links(a.collection).unwrap().add(a.pool[1]).unwrap();
    tx.links(b.collection).unwrap().add(b.pool[1]).unwrap();
    tx.index_put(email, &"taken".to_string(), a.pool[2]).unwrap();
    let err = test_engine.commit(&mut tx).unwrap_err();
    assert!(matches!(err, CoreError::DuplicateUniqueKey { .. }));

    assert_eq!(test_engine.committed_seq(), seq);
    assert_eq!(test_engine.live_pages(), pages);
    assert!(test_engine.link_representation(a.collection).unwrap().is_empty());
    assert!(test_engine.link_representation(b.collection).unwrap().is_empty());
}

#[test]
fn readers_keep_their_snapshot() {
    let test_engine = TestEngine::memory();
    let s = scenarios::populated_links(&test_engine, 4, 2);

    let mut writer = test_engine.begin().unwrap();
    {
        let mut links = writer.links(s.collection).unwrap();
        links.remove(s.pool[0]).unwrap();
        links.add(s.pool[3]).unwrap();
    }

    let mut reader = test_engine.begin().unwrap();
    let mut before = reader.links(s.collection).unwrap().members().unwrap();
    before.sort();
    assert_eq!(before, vec![s.pool[0], s.pool[1]]);

    test_engine.commit(&mut writer).unwrap();
    let mut still = reader.links(s.collection).unwrap().members().unwrap();
    still.sort();
    assert_eq!(still, before);
    drop(reader);
    assert_eq!(test_engine.active_transactions(), 0);

    let mut fresh = test_engine.begin().unwrap();
    let mut after = fresh.links(s.collection).unwrap().members().unwrap();
    after.sort();
    assert_eq!(after, vec![s.pool[1], s.pool[3]]);
}

#[test]
fn stale_writer_must_retry() {
    let test_engine = TestEngine::memory();
    let s = scenarios::link_scenario(&test_engine, 3);

    let mut first = test_engine.begin().unwrap();
    let mut second = test_engine.begin().unwrap();
    first.links(s.collection).unwrap().add(s.pool[0]).unwrap();
    second.links(s.collection).unwrap().add(s.pool[1]).unwrap();
    test_engine.commit(&mut first).unwrap();

    let err = test_engine.commit(&mut second).unwrap_err();
    assert!(err.is_retryable());

    test_engine
        .transaction(|tx| tx.links(s.collection)?.add(s.pool[1]).map(|_| ()))
        .unwrap();
    assert_eq!(
        test_engine.link_representation(s.collection).unwrap().len(),
        2
    );
}

#[test]
fn iteration_survives_removal() {
    let test_engine = TestEngine::with_policy(ConversionPolicy::new(2, -1).unwrap());
    let s = scenarios::populated_links(&test_engine, 5, 5);

    let mut tx = test_engine.begin().unwrap();
    let mut links = tx.links(s.collection).unwrap();
    let snapshot: Vec<_> = links.iter().unwrap().collect();
    for rid in &snapshot {
        if rid.position() % 2 == 0 {
            links.remove(*rid).unwrap();
        }
    }
    let remaining = links.members().unwrap();
    assert!(remaining.iter().all(|rid| rid.position() % 2 == 1));
    assert_eq!(remaining.len() + snapshot.iter().filter(|r| r.position() % 2 == 0).count(), 5);
}

struct Echo;

impl CommitHook for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn on_commit(&self, tx: &mut Transaction, entries: &[JournalEntry]) -> CoreResult<()> {
        for entry in entries {
            if let LogicalId::Index(index) = entry.logical {
                if entry.op == JournalOp::Put {
                    let mut key = entry.key.clone();
                    key.push(b'!');
                    tx.record(LogicalId::Index(index), &key, entry.rid, JournalOp::Put)?;
                }
            }
        }
        Ok(())
    }
}

#[test]
fn hook_passes_are_bounded() {
    let test_engine = TestEngine::memory_with(test_config().max_hook_passes(3));
    let segment = test_engine.create_segment("Tag", false).unwrap();
    let index = test_engine
        .create_index("Tag.name", segment, false, KeyPolicy::MultiKey)
        .unwrap();
    let rid = test_engine
        .transaction(|tx| tx.create_record(segment))
        .unwrap();
    test_engine.register_hook(Arc::new(Echo));

    let err = test_engine
        .transaction(|tx| tx.index_put(index, &b"t".to_vec(), rid).map(|_| ()))
        .unwrap_err();
    assert!(matches!(err, CoreError::TransactionAborted { .. }));
    assert_eq!(test_engine.stats().transactions_aborted, 1);

    let tree = test_engine
        .load_isolated_tree(test_engine.index_pointer(index).unwrap())
        .unwrap();
    assert_eq!(tree.size().unwrap(), 0);
}

#[test]
fn committed_trees_survive_reopen() {
    let test_engine = TestEngine::file_with(test_config().link_policy(ConversionPolicy::tree_only()));
    let s = scenarios::populated_links(&test_engine, 40, 40);
    let index = test_engine
        .create_index("Node.rank", s.segment, false, KeyPolicy::SingleKeyPerRecord)
        .unwrap();
    test_engine
        .transaction(|tx| {
            for (rank, rid) in s.pool.iter().enumerate() {
                tx.index_put(index, &(rank as u64), *rid)?;
            }
            Ok(())
        })
        .unwrap();
    let links = test_engine.link_representation(s.collection).unwrap().pointer().unwrap();
    let ranks = test_engine.index_pointer(index).unwrap();
    test_engine.flush().unwrap();

    let reopened = test_engine.reopen();
    let store = reopened.trees().store();
    assert!(store.file_id(&linkdb_core::index_file_name("Node.rank")).is_some());

    let tree = reopened.load_isolated_tree(links).unwrap();
    assert_eq!(tree.size().unwrap(), 40);
    let members: Vec<_> = tree.entries().unwrap().into_iter().map(|e| e.rid).collect();
    let mut expected = s.pool.clone();
    expected.sort();
    assert_eq!(members, expected);

    let tree = reopened.load_isolated_tree(ranks).unwrap();
    assert_eq!(tree.size().unwrap(), 40);
    let first = tree.first().unwrap().unwrap();
    assert_eq!(first.rid, s.pool[0]);
    let last = tree.last().unwrap().unwrap();
    assert_eq!(last.rid, s.pool[39]);
}

#[test]
fn deleted_collections_release_their_trees() {
    let test_engine = TestEngine::with_policy(ConversionPolicy::tree_only());
    let s = scenarios::link_scenario(&test_engine, 30);
    let baseline = test_engine.live_pages();
    test_engine
        .transaction(|tx| {
            let mut links = tx.links(s.collection)?;
            for rid in &s.pool {
                links.add(*rid)?;
            }
            Ok(())
        })
        .unwrap();
    assert!(test_engine.live_pages() > baseline + 1);

    test_engine
        .transaction(|tx| tx.delete_link_collection(s.collection))
        .unwrap();
    assert_eq!(test_engine.live_pages(), baseline);
    assert_eq!(test_engine.link_collection_count(), 0);
    assert!(test_engine.record_meta(s.owner).unwrap().links.is_empty());
}

#[test]
fn deleted_tree_outlives_older_readers() {
    let test_engine = TestEngine::with_policy(ConversionPolicy::tree_only());
    let s = scenarios::link_scenario(&test_engine, 30);
    let baseline = test_engine.live_pages();
    test_engine
        .transaction(|tx| {
            let mut links = tx.links(s.collection)?;
            for rid in &s.pool {
                links.add(*rid)?;
            }
            Ok(())
        })
        .unwrap();
    let populated = test_engine.live_pages();

    let mut reader = test_engine.begin().unwrap();
    test_engine
        .transaction(|tx| tx.delete_link_collection(s.collection))
        .unwrap();
    assert_eq!(test_engine.live_pages(), populated);
    assert_eq!(test_engine.retired_trees(), 1);

    let mut members = reader.links(s.collection).unwrap().members().unwrap();
    members.sort();
    let mut expected = s.pool.clone();
    expected.sort();
    assert_eq!(members, expected);

    drop(reader);
    assert_eq!(test_engine.retired_trees(), 0);
    assert_eq!(test_engine.live_pages(), baseline);
}
