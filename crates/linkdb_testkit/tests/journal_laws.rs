//! Coalescing laws of the mutation journal.

use linkdb_core::{
    CollectionId, IndexId, JournalOp, KeyPolicy, LogicalId, MutationJournal, RecordId,
};
use linkdb_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

type Model = BTreeMap<Vec<u8>, BTreeSet<RecordId>>;

/// Records only operations that change membership, the way link
/// collections and well-behaved index maintenance do.
fn replay(
    journal: &mut MutationJournal,
    logical: LogicalId,
    model: &mut Model,
    ops: &[(Vec<u8>, RecordId, JournalOp)],
) {
    for (key, rid, op) in ops {
        let members = model.entry(key.clone()).or_default();
        let effective = match op {
            JournalOp::Put => members.insert(*rid),
            JournalOp::Remove => members.remove(rid),
        };
        if effective {
            journal.record(logical, key, *rid, *op);
        }
    }
}

fn durable_strategy() -> impl Strategy<Value = Model> {
    prop::collection::btree_map(
        index_key_strategy(),
        prop::collection::btree_set(record_id_strategy(6), 0..4),
        0..4,
    )
}

fn ops_strategy() -> impl Strategy<Value = Vec<(Vec<u8>, RecordId, JournalOp)>> {
    prop::collection::vec(
        (index_key_strategy(), record_id_strategy(6), journal_op_strategy()),
        0..40,
    )
}

proptest! {
    #![proptest_config(PropTestConfig::default().to_proptest_config())]

    #[test]
    fn merged_view_equals_sequential_application(
        durable in durable_strategy(),
        ops in ops_strategy(),
    ) {
        let logical = LogicalId::Index(IndexId::new(1));
        let mut journal = MutationJournal::new();
        let mut model = durable.clone();
        replay(&mut journal, logical, &mut model, &ops);

        let keys: BTreeSet<&Vec<u8>> = durable.keys().chain(model.keys()).collect();
        for key in keys {
            let base: Vec<RecordId> = durable
                .get(key)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            let merged = journal.merged_view(logical, key, &base).unwrap();
            let expected: Vec<RecordId> = model
                .get(key)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            prop_assert_eq!(merged, expected);
        }
    }

    #[test]
    fn buckets_hold_one_entry_per_kind(
        durable in durable_strategy(),
        ops in ops_strategy(),
    ) {
        let logical = LogicalId::Index(IndexId::new(1));
        let mut journal = MutationJournal::new();
        let mut model = durable;
        replay(&mut journal, logical, &mut model, &ops);

        for changes in journal.entries_for(logical) {
            let puts: BTreeSet<_> = changes.puts.iter().collect();
            let removes: BTreeSet<_> = changes.removes.iter().collect();
            prop_assert_eq!(puts.len(), changes.puts.len());
            prop_assert_eq!(removes.len(), changes.removes.len());
        }

        let entries = journal.entries_in_order(logical);
        for put in entries.iter().filter(|e| e.op == JournalOp::Put) {
            let remove_after = entries.iter().any(|e| {
                e.op == JournalOp::Remove && e.key == put.key && e.rid == put.rid && e.seq > put.seq
            });
            prop_assert!(!remove_after, "REMOVE must precede PUT in a bucket");
        }
    }

    #[test]
    fn membership_delta_tracks_size(
        durable in prop::collection::btree_set(record_id_strategy(8), 0..6),
        ops in prop::collection::vec((record_id_strategy(8), journal_op_strategy()), 0..40),
    ) {
        let logical = LogicalId::Links(CollectionId::new(1));
        let mut journal = MutationJournal::new();
        let mut members = durable.clone();
        for (rid, op) in ops {
            let effective = match op {
                JournalOp::Put => members.insert(rid),
                JournalOp::Remove => members.remove(&rid),
            };
            if effective {
                journal.record(logical, &rid.to_bytes(), rid, op);
            }
        }

        let delta = journal.membership_delta(logical);
        prop_assert_eq!(durable.len() as i64 + delta, members.len() as i64);

        let mut replayed = durable;
        for entry in journal.entries_in_order(logical) {
            match entry.op {
                JournalOp::Put => replayed.insert(entry.rid),
                JournalOp::Remove => replayed.remove(&entry.rid),
            };
        }
        prop_assert_eq!(replayed, members);
    }

    #[test]
    fn single_key_policy_keeps_one_put_per_record(
        ops in prop::collection::vec((index_key_strategy(), record_id_strategy(4)), 0..30),
    ) {
        let logical = LogicalId::Index(IndexId::new(1));
        let mut journal = MutationJournal::new();
        journal.set_key_policy(logical, KeyPolicy::SingleKeyPerRecord);
        let mut last_key: BTreeMap<RecordId, Vec<u8>> = BTreeMap::new();
        for (key, rid) in ops {
            journal.record(logical, &key, rid, JournalOp::Put);
            last_key.insert(rid, key);
        }

        let entries = journal.entries_in_order(logical);
        prop_assert_eq!(entries.len(), last_key.len());
        for entry in entries {
            prop_assert_eq!(Some(&entry.key), last_key.get(&entry.rid));
        }
    }
}
