//! Link collection operations of a transaction.
//!
//! A member with count `n` is journaled under `link_key(rid, n)`. Adding
//! removes the key for the current count and puts the next one; removing
//! does the reverse. After coalescing a member has at most a REMOVE of its
//! base key and a PUT of its current key pending.

use crate::btree::{link_file_name, CollectionPointer};
use crate::collection::{
    link_key, link_key_bounds, link_key_count, LinkEntry, LinkOptions, Representation,
};
use crate::error::{CoreError, CoreResult};
use crate::journal::{JournalEntry, JournalOp, LogicalId};
use crate::record::RecordId;
use crate::transaction::Transaction;
use crate::types::CollectionId;
use tracing::debug;

/// A link collection's base state as seen by one transaction.
pub(super) struct LinkView {
    pub owner: RecordId,
    pub options: LinkOptions,
    pub base: Representation,
    /// The base was installed by this transaction and is still empty.
    pub fresh: bool,
}

/// Applies pending member changes, in sequence order, to `entries`.
///
/// # Errors
///
/// [`CoreError::ConsistencyViolation`] if a change does not match the count
/// it expects to find.
pub(super) fn merge_entries(
    mut entries: Vec<LinkEntry>,
    pending: &[JournalEntry],
) -> CoreResult<Vec<LinkEntry>> {
    for change in pending {
        let count = link_key_count(&change.key)?;
        let pos = entries.iter().position(|e| e.rid == change.rid);
        match (change.op, pos) {
            // Zeroed rather than dropped so a later PUT keeps the position.
            (JournalOp::Remove, Some(i)) if entries[i].count == count => entries[i].count = 0,
            (JournalOp::Put, Some(i)) if entries[i].count == 0 => entries[i].count = count,
            (JournalOp::Put, None) => entries.push(LinkEntry::new(change.rid, count)),
            (op, _) => {
                return Err(CoreError::consistency_violation(format!(
                    "pending {op:?} of {} with count {count} does not match {}",
                    change.rid, change.logical
                )))
            }
        }
    }
    entries.retain(|e| e.count > 0);
    Ok(entries)
}

impl Transaction {
    pub(super) fn link_view(&self, id: CollectionId) -> CoreResult<LinkView> {
        let not_found = || CoreError::CollectionNotFound { id: id.as_u64() };
        if self.deleted_collections.contains(&id) {
            return Err(not_found());
        }
        let (owner, options, durable) = match self.new_collections.get(&id) {
            Some((owner, options)) => (*owner, *options, None),
            None => {
                let state = self.snapshot().link(id).ok_or_else(not_found)?;
                (state.owner, state.options, Some(state.repr))
            }
        };
        match (self.link_bases.get(&id), durable) {
            (Some(base), _) => Ok(LinkView {
                owner,
                options,
                base: base.clone(),
                fresh: true,
            }),
            (None, Some(base)) => Ok(LinkView {
                owner,
                options,
                base,
                fresh: false,
            }),
            (None, None) => Err(not_found()),
        }
    }

    fn base_entries(&self, view: &LinkView) -> CoreResult<Vec<LinkEntry>> {
        if view.fresh {
            return Ok(Vec::new());
        }
        match &view.base {
            Representation::Embedded(entries) => Ok(entries.clone()),
            Representation::TreeBacked { pointer, .. } => self
                .snapshot()
                .tree_scan(*pointer)?
                .into_iter()
                .map(|e| Ok(LinkEntry::new(e.rid, link_key_count(&e.key)?)))
                .collect(),
        }
    }

    fn base_count(&self, view: &LinkView, rid: RecordId) -> CoreResult<u32> {
        if view.fresh {
            return Ok(0);
        }
        match &view.base {
            Representation::Embedded(entries) => Ok(entries
                .iter()
                .find(|e| e.rid == rid)
                .map_or(0, |e| e.count)),
            Representation::TreeBacked { pointer, .. } => {
                let (lo, hi) = link_key_bounds(rid);
                match self.snapshot().tree_range(*pointer, &lo, &hi)?.first() {
                    Some(entry) => link_key_count(&entry.key),
                    None => Ok(0),
                }
            }
        }
    }

    fn count_in(&self, view: &LinkView, id: CollectionId, rid: RecordId) -> CoreResult<u32> {
        let (lo, hi) = link_key_bounds(rid);
        let pending = self.journal.entries_in_range(LogicalId::Links(id), &lo, &hi);
        match pending.iter().rev().find(|e| e.op == JournalOp::Put) {
            Some(put) => link_key_count(&put.key),
            None if pending.is_empty() => self.base_count(view, rid),
            None => Ok(0),
        }
    }

    fn size_in(&self, view: &LinkView, id: CollectionId) -> usize {
        let base = if view.fresh { 0 } else { view.base.len() };
        let delta = self.link_deltas.get(&id).copied().unwrap_or(0);
        (base as i64 + delta).max(0) as usize
    }

    pub(crate) fn link_count(&self, id: CollectionId, rid: RecordId) -> CoreResult<u32> {
        let view = self.link_view(id)?;
        self.count_in(&view, id, rid)
    }

    pub(crate) fn link_contains(&self, id: CollectionId, rid: RecordId) -> CoreResult<bool> {
        Ok(self.link_count(id, rid)? > 0)
    }

    pub(crate) fn link_size(&self, id: CollectionId) -> CoreResult<usize> {
        let view = self.link_view(id)?;
        Ok(self.size_in(&view, id))
    }

    pub(crate) fn link_entries(&self, id: CollectionId) -> CoreResult<Vec<LinkEntry>> {
        let view = self.link_view(id)?;
        let base = self.base_entries(&view)?;
        let pending = self.journal.entries_in_order(LogicalId::Links(id));
        let mut entries = merge_entries(base, &pending)?;
        if !view.base.is_embedded() {
            entries.sort_by_key(|e| e.rid);
        }
        Ok(entries)
    }

    pub(crate) fn link_members(&self, id: CollectionId) -> CoreResult<Vec<RecordId>> {
        Ok(self
            .link_entries(id)?
            .into_iter()
            .flat_map(|e| std::iter::repeat(e.rid).take(e.count as usize))
            .collect())
    }

    pub(crate) fn link_pointer(&self, id: CollectionId) -> CoreResult<Option<CollectionPointer>> {
        Ok(self.link_view(id)?.base.pointer())
    }

    pub(crate) fn link_add(&mut self, id: CollectionId, rid: RecordId) -> CoreResult<bool> {
        self.ensure_active()?;
        let view = self.link_view(id)?;
        if !self.record_exists(rid) {
            return Err(CoreError::schema_violation(format!(
                "cannot link {} to missing record {rid}",
                view.owner
            )));
        }
        let count = self.count_in(&view, id, rid)?;
        if count >= view.options.counter_max {
            return Ok(false);
        }
        let logical = LogicalId::Links(id);
        if count > 0 {
            self.journal
                .record(logical, &link_key(rid, count), rid, JournalOp::Remove);
        }
        self.journal
            .record(logical, &link_key(rid, count + 1), rid, JournalOp::Put);
        *self.link_deltas.entry(id).or_default() += 1;
        self.touch(view.owner);

        let size = self.size_in(&view, id);
        if view.base.is_embedded() && view.options.policy.wants_tree(size) {
            if let Err(err) = self.convert_to_tree(id, &view) {
                self.mark_rollback_only(&err);
                return Err(err);
            }
        }
        Ok(true)
    }

    pub(crate) fn link_remove(&mut self, id: CollectionId, rid: RecordId) -> CoreResult<bool> {
        self.ensure_active()?;
        let view = self.link_view(id)?;
        let count = self.count_in(&view, id, rid)?;
        if count == 0 {
            return Ok(false);
        }
        let logical = LogicalId::Links(id);
        self.journal
            .record(logical, &link_key(rid, count), rid, JournalOp::Remove);
        if count > 1 {
            self.journal
                .record(logical, &link_key(rid, count - 1), rid, JournalOp::Put);
        }
        *self.link_deltas.entry(id).or_default() -= 1;
        self.touch(view.owner);

        let size = self.size_in(&view, id);
        if !view.base.is_embedded() && view.options.policy.wants_embedded(size) {
            self.convert_to_embedded(id, &view)?;
        }
        Ok(true)
    }

    fn convert_to_tree(&mut self, id: CollectionId, view: &LinkView) -> CoreResult<()> {
        let entries = self.link_entries(id)?;
        let file = link_file_name(view.owner.segment());
        let pointer = self.shared.trees.create_tree(&file)?;
        self.shared.stats.record_tree_created();
        self.speculative.push(pointer);
        self.link_bases
            .insert(id, Representation::TreeBacked { pointer, size: 0 });
        debug!(collection = %id, pointer = %pointer, members = entries.len(), "converting to tree");
        self.reexpress(id, entries);
        Ok(())
    }

    fn convert_to_embedded(&mut self, id: CollectionId, view: &LinkView) -> CoreResult<()> {
        let entries = self.link_entries(id)?;
        self.link_bases
            .insert(id, Representation::Embedded(Vec::new()));
        debug!(collection = %id, from = ?view.base.pointer(), members = entries.len(), "converting to embedded");
        self.reexpress(id, entries);
        Ok(())
    }

    /// Replays `entries` as PUTs against a fresh, empty base.
    fn reexpress(&mut self, id: CollectionId, entries: Vec<LinkEntry>) {
        let logical = LogicalId::Links(id);
        self.journal.reset(logical);
        let mut size = 0i64;
        for entry in entries {
            self.journal.record(
                logical,
                &link_key(entry.rid, entry.count),
                entry.rid,
                JournalOp::Put,
            );
            size += i64::from(entry.count);
        }
        self.link_deltas.insert(id, size);
    }
}
