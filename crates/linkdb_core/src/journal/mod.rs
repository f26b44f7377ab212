//! Per-transaction mutation journal.
//!
//! The journal buffers PUT/REMOVE operations for link collections and
//! indexes until commit. Entries are grouped by logical collection and key
//! and coalesced as they arrive:
//!
//! - REMOVE after a pending PUT of the same `(logical, key, rid)` cancels
//!   both.
//! - A second operation of the same kind for the same triple replaces the
//!   first and takes the newer sequence number.
//! - REMOVE followed by PUT of the same triple keeps both. Commit replays a
//!   durable removal and then a durable insertion.
//! - Under [`KeyPolicy::SingleKeyPerRecord`], a same-kind entry for the
//!   record under another key is moved to the new key.
//!
//! Consequently a bucket holds at most one PUT and one REMOVE per record,
//! and when both are present the REMOVE comes first.

mod entry;

pub use entry::{JournalEntry, JournalOp, KeyChanges, KeyPolicy, LogicalId, RecordOutcome};

use crate::error::{CoreError, CoreResult};
use crate::record::RecordId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use tracing::trace;

#[derive(Debug, Clone, Copy)]
struct Pending {
    rid: RecordId,
    op: JournalOp,
    seq: u64,
}

#[derive(Debug, Default)]
struct LogicalChanges {
    policy: KeyPolicy,
    cleared: bool,
    keys: BTreeMap<Vec<u8>, Vec<Pending>>,
    // Key holding each pending (record, op); kept for single-key policies.
    placed: HashMap<(RecordId, JournalOp), Vec<u8>>,
    // Pending PUTs minus pending REMOVEs.
    delta: i64,
}

impl LogicalChanges {
    fn remove_pending(&mut self, key: &[u8], rid: RecordId, op: JournalOp) -> bool {
        let Some(bucket) = self.keys.get_mut(key) else {
            return false;
        };
        let Some(pos) = bucket.iter().position(|p| p.rid == rid && p.op == op) else {
            return false;
        };
        bucket.remove(pos);
        self.delta -= weight(op);
        if bucket.is_empty() {
            self.keys.remove(key);
        }
        if self.policy == KeyPolicy::SingleKeyPerRecord {
            self.placed.remove(&(rid, op));
        }
        true
    }

    fn push(&mut self, key: Vec<u8>, pending: Pending) {
        if self.policy == KeyPolicy::SingleKeyPerRecord {
            self.placed.insert((pending.rid, pending.op), key.clone());
        }
        self.delta += weight(pending.op);
        self.keys.entry(key).or_default().push(pending);
    }

    fn drop_pending(&mut self) {
        self.keys.clear();
        self.placed.clear();
        self.delta = 0;
    }

    fn entry_count(&self) -> usize {
        self.keys.values().map(Vec::len).sum()
    }
}

fn weight(op: JournalOp) -> i64 {
    match op {
        JournalOp::Put => 1,
        JournalOp::Remove => -1,
    }
}

/// Buffer of pending operations private to one transaction.
///
/// The journal performs no I/O. Durable state is supplied by the caller
/// whenever a merged view is computed.
#[derive(Debug, Default)]
pub struct MutationJournal {
    next_seq: u64,
    collections: HashMap<LogicalId, LogicalChanges>,
    order: Vec<LogicalId>,
}

impl MutationJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn changes_mut(&mut self, logical: LogicalId) -> &mut LogicalChanges {
        if !self.collections.contains_key(&logical) {
            self.order.push(logical);
        }
        self.collections.entry(logical).or_default()
    }

    /// Sets the key policy of a logical collection. Must be called before
    /// its first entry is recorded to take effect on relocation.
    pub fn set_key_policy(&mut self, logical: LogicalId, policy: KeyPolicy) {
        self.changes_mut(logical).policy = policy;
    }

    /// Records an operation, coalescing it with pending ones.
    pub fn record(
        &mut self,
        logical: LogicalId,
        key: &[u8],
        rid: RecordId,
        op: JournalOp,
    ) -> RecordOutcome {
        let seq = self.next_seq;
        self.next_seq += 1;
        let changes = self.changes_mut(logical);

        let outcome = if op == JournalOp::Remove && changes.remove_pending(key, rid, JournalOp::Put)
        {
            RecordOutcome::Cancelled
        } else {
            let mut relocated = false;
            if changes.policy == KeyPolicy::SingleKeyPerRecord {
                if let Some(old_key) = changes.placed.get(&(rid, op)).cloned() {
                    if old_key != key {
                        relocated = changes.remove_pending(&old_key, rid, op);
                    }
                }
            }
            let replaced = changes.remove_pending(key, rid, op);
            changes.push(key.to_vec(), Pending { rid, op, seq });
            if replaced {
                RecordOutcome::Replaced
            } else if relocated {
                RecordOutcome::Relocated
            } else {
                RecordOutcome::Appended
            }
        };
        trace!(logical = %logical, rid = %rid, ?op, ?outcome, "journal record");
        outcome
    }

    /// Returns the records associated with `key`: `durable` with the
    /// pending operations for that key applied in sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConsistencyViolation`] if a pending REMOVE
    /// targets a record that is neither durable nor previously put.
    pub fn merged_view(
        &self,
        logical: LogicalId,
        key: &[u8],
        durable: &[RecordId],
    ) -> CoreResult<Vec<RecordId>> {
        let changes = self.collections.get(&logical);
        let cleared = changes.is_some_and(|c| c.cleared);
        let mut members: BTreeSet<RecordId> = if cleared {
            BTreeSet::new()
        } else {
            durable.iter().copied().collect()
        };

        if let Some(bucket) = changes.and_then(|c| c.keys.get(key)) {
            for pending in bucket {
                match pending.op {
                    JournalOp::Put => {
                        members.insert(pending.rid);
                    }
                    JournalOp::Remove => {
                        if !members.remove(&pending.rid) {
                            return Err(CoreError::consistency_violation(format!(
                                "pending remove of {} from {logical} matches no durable or pending entry",
                                pending.rid
                            )));
                        }
                    }
                }
            }
        }
        Ok(members.into_iter().collect())
    }

    /// Returns the latest pending operation for a triple.
    #[must_use]
    pub fn last_op(&self, logical: LogicalId, key: &[u8], rid: RecordId) -> Option<JournalOp> {
        self.collections
            .get(&logical)?
            .keys
            .get(key)?
            .iter()
            .rev()
            .find(|p| p.rid == rid)
            .map(|p| p.op)
    }

    /// Pending PUTs minus pending REMOVEs of `logical`.
    ///
    /// For a collection whose entries each stand for one member this is the
    /// net change in membership relative to its base state.
    #[must_use]
    pub fn membership_delta(&self, logical: LogicalId) -> i64 {
        self.collections.get(&logical).map_or(0, |c| c.delta)
    }

    /// Returns all pending changes of `logical`, grouped by key in key order.
    #[must_use]
    pub fn entries_for(&self, logical: LogicalId) -> Vec<KeyChanges> {
        let Some(changes) = self.collections.get(&logical) else {
            return Vec::new();
        };
        changes
            .keys
            .iter()
            .map(|(key, bucket)| {
                let mut out = KeyChanges {
                    key: key.clone(),
                    ..KeyChanges::default()
                };
                for pending in bucket {
                    match pending.op {
                        JournalOp::Put => out.puts.push(pending.rid),
                        JournalOp::Remove => out.removes.push(pending.rid),
                    }
                }
                out
            })
            .collect()
    }

    /// Returns all pending entries of `logical` in sequence order.
    #[must_use]
    pub fn entries_in_order(&self, logical: LogicalId) -> Vec<JournalEntry> {
        let Some(changes) = self.collections.get(&logical) else {
            return Vec::new();
        };
        let mut entries: Vec<JournalEntry> = changes
            .keys
            .iter()
            .flat_map(|(key, bucket)| {
                bucket.iter().map(move |p| JournalEntry {
                    logical,
                    key: key.clone(),
                    rid: p.rid,
                    op: p.op,
                    seq: p.seq,
                })
            })
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    /// Returns pending entries of `logical` whose key lies in `lo..=hi`, in
    /// sequence order.
    #[must_use]
    pub fn entries_in_range(&self, logical: LogicalId, lo: &[u8], hi: &[u8]) -> Vec<JournalEntry> {
        let Some(changes) = self.collections.get(&logical) else {
            return Vec::new();
        };
        if lo > hi {
            return Vec::new();
        }
        let mut entries: Vec<JournalEntry> = changes
            .keys
            .range::<[u8], _>((Bound::Included(lo), Bound::Included(hi)))
            .flat_map(|(key, bucket)| {
                bucket.iter().map(move |p| JournalEntry {
                    logical,
                    key: key.clone(),
                    rid: p.rid,
                    op: p.op,
                    seq: p.seq,
                })
            })
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    /// Returns entries of every logical collection with a sequence number
    /// of at least `since`, in sequence order.
    #[must_use]
    pub fn entries_since(&self, since: u64) -> Vec<JournalEntry> {
        let mut entries: Vec<JournalEntry> = self
            .order
            .iter()
            .flat_map(|logical| self.entries_in_order(*logical))
            .filter(|e| e.seq >= since)
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    /// Returns the sequence number the next recorded entry will get.
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Drops pending entries of `logical` and marks it cleared: merged views
    /// ignore durable state and commit removes every durable entry first.
    pub fn clear(&mut self, logical: LogicalId) {
        let changes = self.changes_mut(logical);
        changes.drop_pending();
        changes.cleared = true;
    }

    /// Returns true if `logical` was cleared in this transaction.
    #[must_use]
    pub fn is_cleared(&self, logical: LogicalId) -> bool {
        self.collections.get(&logical).is_some_and(|c| c.cleared)
    }

    /// Drops pending entries and the cleared mark of `logical`, keeping it in
    /// the touched list. Used when a collection's base representation is
    /// replaced and its members are re-expressed against the new base.
    pub fn reset(&mut self, logical: LogicalId) {
        let changes = self.changes_mut(logical);
        changes.drop_pending();
        changes.cleared = false;
    }

    /// Logical collections with journal state, in first-touch order.
    #[must_use]
    pub fn touched(&self) -> &[LogicalId] {
        &self.order
    }

    /// Returns the number of pending entries across all collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.collections.values().map(LogicalChanges::entry_count).sum()
    }

    /// Returns true if no entries are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards everything.
    pub fn discard(&mut self) {
        self.collections.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CollectionId, IndexId, SegmentId};

    const LINKS: LogicalId = LogicalId::Links(CollectionId(1));
    const INDEX: LogicalId = LogicalId::Index(IndexId(1));

    fn rid(position: u64) -> RecordId {
        RecordId::new(SegmentId::new(1), position)
    }

    fn key(k: u8) -> Vec<u8> {
        vec![k]
    }

    #[test]
    fn put_then_remove_cancels() {
        let mut journal = MutationJournal::new();
        journal.record(INDEX, &key(1), rid(1), JournalOp::Put);
        let outcome = journal.record(INDEX, &key(1), rid(1), JournalOp::Remove);

        assert_eq!(outcome, RecordOutcome::Cancelled);
        assert!(journal.entries_for(INDEX).is_empty());
        assert!(journal.is_empty());
    }

    #[test]
    fn remove_then_put_keeps_both() {
        let mut journal = MutationJournal::new();
        journal.record(INDEX, &key(1), rid(1), JournalOp::Remove);
        journal.record(INDEX, &key(1), rid(1), JournalOp::Put);

        let changes = journal.entries_for(INDEX);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].removes, vec![rid(1)]);
        assert_eq!(changes[0].puts, vec![rid(1)]);
        assert_eq!(journal.len(), 2);
    }

    #[test]
    fn same_kind_replaces() {
        let mut journal = MutationJournal::new();
        journal.record(INDEX, &key(1), rid(1), JournalOp::Put);
        let outcome = journal.record(INDEX, &key(1), rid(1), JournalOp::Put);

        assert_eq!(outcome, RecordOutcome::Replaced);
        assert_eq!(journal.len(), 1);
        assert_eq!(journal.entries_in_order(INDEX)[0].seq, 1);
    }

    #[test]
    fn remove_put_remove_leaves_remove() {
        let mut journal = MutationJournal::new();
        journal.record(INDEX, &key(1), rid(1), JournalOp::Remove);
        journal.record(INDEX, &key(1), rid(1), JournalOp::Put);
        journal.record(INDEX, &key(1), rid(1), JournalOp::Remove);

        let changes = journal.entries_for(INDEX);
        assert_eq!(changes[0].removes, vec![rid(1)]);
        assert!(changes[0].puts.is_empty());
    }

    #[test]
    fn multi_key_policy_never_relocates() {
        let mut journal = MutationJournal::new();
        journal.record(INDEX, &key(1), rid(1), JournalOp::Put);
        let outcome = journal.record(INDEX, &key(2), rid(1), JournalOp::Put);

        assert_eq!(outcome, RecordOutcome::Appended);
        assert_eq!(journal.entries_for(INDEX).len(), 2);
    }

    #[test]
    fn single_key_policy_relocates_same_kind() {
        let mut journal = MutationJournal::new();
        journal.set_key_policy(INDEX, KeyPolicy::SingleKeyPerRecord);
        journal.record(INDEX, &key(1), rid(1), JournalOp::Put);
        let outcome = journal.record(INDEX, &key(2), rid(1), JournalOp::Put);

        assert_eq!(outcome, RecordOutcome::Relocated);
        let changes = journal.entries_for(INDEX);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].key, key(2));
        assert_eq!(changes[0].puts, vec![rid(1)]);
    }

    #[test]
    fn property_change_sequence_leaves_single_put() {
        // A new record's indexed value goes 0 -> 1 inside one transaction.
        let mut journal = MutationJournal::new();
        journal.set_key_policy(INDEX, KeyPolicy::SingleKeyPerRecord);
        journal.record(INDEX, &key(0), rid(1), JournalOp::Put);
        journal.record(INDEX, &key(0), rid(1), JournalOp::Remove);
        journal.record(INDEX, &key(1), rid(1), JournalOp::Put);

        let changes = journal.entries_for(INDEX);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].key, key(1));
        assert_eq!(changes[0].puts, vec![rid(1)]);
        assert!(changes[0].removes.is_empty());
    }

    #[test]
    fn merged_view_applies_in_order() {
        let mut journal = MutationJournal::new();
        journal.record(INDEX, &key(1), rid(2), JournalOp::Put);
        journal.record(INDEX, &key(1), rid(1), JournalOp::Remove);

        let view = journal.merged_view(INDEX, &key(1), &[rid(1), rid(3)]).unwrap();
        assert_eq!(view, vec![rid(2), rid(3)]);
    }

    #[test]
    fn merged_view_remove_of_unknown_is_violation() {
        let mut journal = MutationJournal::new();
        journal.record(INDEX, &key(1), rid(9), JournalOp::Remove);
        assert!(matches!(
            journal.merged_view(INDEX, &key(1), &[]),
            Err(CoreError::ConsistencyViolation { .. })
        ));
    }

    #[test]
    fn merged_view_of_untouched_key_is_durable() {
        let journal = MutationJournal::new();
        let view = journal.merged_view(INDEX, &key(5), &[rid(4)]).unwrap();
        assert_eq!(view, vec![rid(4)]);
    }

    #[test]
    fn cleared_collection_ignores_durable() {
        let mut journal = MutationJournal::new();
        journal.clear(INDEX);
        journal.record(INDEX, &key(1), rid(2), JournalOp::Put);

        let view = journal.merged_view(INDEX, &key(1), &[rid(1)]).unwrap();
        assert_eq!(view, vec![rid(2)]);
        assert!(journal.is_cleared(INDEX));
    }

    #[test]
    fn membership_delta_counts_net_change() {
        let mut journal = MutationJournal::new();
        let a = rid(1);
        let b = rid(2);
        let c = rid(3);
        journal.record(LINKS, &a.to_bytes(), a, JournalOp::Put);
        journal.record(LINKS, &b.to_bytes(), b, JournalOp::Remove);
        journal.record(LINKS, &c.to_bytes(), c, JournalOp::Remove);
        journal.record(LINKS, &c.to_bytes(), c, JournalOp::Put);

        assert_eq!(journal.membership_delta(LINKS), 0);
        journal.record(LINKS, &b.to_bytes(), b, JournalOp::Put);
        assert_eq!(journal.membership_delta(LINKS), 1);
    }

    #[test]
    fn touched_keeps_first_touch_order() {
        let mut journal = MutationJournal::new();
        journal.record(INDEX, &key(1), rid(1), JournalOp::Put);
        journal.record(LINKS, &key(1), rid(1), JournalOp::Put);
        journal.record(INDEX, &key(2), rid(1), JournalOp::Put);
        assert_eq!(journal.touched(), &[INDEX, LINKS]);
    }

    #[test]
    fn entries_since_filters_by_sequence() {
        let mut journal = MutationJournal::new();
        journal.record(INDEX, &key(1), rid(1), JournalOp::Put);
        let mark = journal.next_seq();
        journal.record(LINKS, &key(1), rid(2), JournalOp::Put);

        let entries = journal.entries_since(mark);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].logical, LINKS);
    }

    #[test]
    fn reset_drops_entries_but_keeps_touch() {
        let mut journal = MutationJournal::new();
        journal.record(LINKS, &key(1), rid(1), JournalOp::Put);
        journal.reset(LINKS);
        assert!(journal.is_empty());
        assert_eq!(journal.touched(), &[LINKS]);
    }

    #[test]
    fn cancel_wins_over_relocation() {
        // Value goes k1 -> k2 and the record is then dropped from the index.
        let mut journal = MutationJournal::new();
        journal.set_key_policy(INDEX, KeyPolicy::SingleKeyPerRecord);
        journal.record(INDEX, &key(1), rid(1), JournalOp::Remove);
        journal.record(INDEX, &key(2), rid(1), JournalOp::Put);
        let outcome = journal.record(INDEX, &key(2), rid(1), JournalOp::Remove);

        assert_eq!(outcome, RecordOutcome::Cancelled);
        let changes = journal.entries_for(INDEX);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].key, key(1));
        assert_eq!(changes[0].removes, vec![rid(1)]);
        assert_eq!(journal.membership_delta(INDEX), -1);
    }

    #[test]
    fn entries_in_range_by_key_prefix() {
        let mut journal = MutationJournal::new();
        journal.record(LINKS, &[1, 0], rid(1), JournalOp::Remove);
        journal.record(LINKS, &[1, 5], rid(1), JournalOp::Put);
        journal.record(LINKS, &[2, 1], rid(2), JournalOp::Put);

        let entries = journal.entries_in_range(LINKS, &[1, 0], &[1, 255]);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].op, JournalOp::Remove);
        assert_eq!(entries[1].key, vec![1, 5]);
        assert!(journal.entries_in_range(LINKS, &[3], &[2]).is_empty());
        assert!(journal.entries_in_range(INDEX, &[0], &[9]).is_empty());
    }
}
