//! Commit protocol.
//!
//! 1. Run commit hooks to a fixpoint.
//! 2. Check observed versions (fail fast, nothing locked yet).
//! 3. Take ownership of every affected tree, in pointer order.
//! 4. Replay the journal into one atomic operation: REMOVEs then PUTs per
//!    key, unique checks, and release of speculative trees left unused.
//! 5. Under the commit latch, check versions again. Then, holding the
//!    history gate, publish the operation and the record and link tables
//!    and append the commit's undo record.
//!
//! Trees the commit stops referencing are retired and released once no
//! active transaction reads a snapshot older than the commit.
//!
//! Any failure discards the operation and rolls the transaction back.

use crate::btree::{CollectionPointer, TreeEntry, TreeOwnership};
use crate::collection::{LinkEntry, LinkOptions, LinkState, Representation};
use crate::engine::EngineShared;
use crate::error::{CoreError, CoreResult};
use crate::index::IndexDefinition;
use crate::journal::LogicalId;
use crate::record::{RecordBatch, RecordId};
use crate::snapshot::{CommitRecord, TreeChanges};
use crate::transaction::links::merge_entries;
use crate::transaction::{Transaction, TransactionState};
use crate::types::{CollectionId, SequenceNumber};
use linkdb_storage::AtomicOperation;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

type TreeLog = HashMap<CollectionPointer, TreeChanges>;

enum LinkTarget {
    Embedded(Vec<LinkEntry>),
    Tree {
        pointer: CollectionPointer,
        /// Created by this transaction, so no snapshot can read it.
        fresh: bool,
    },
}

struct LinkPlan {
    id: CollectionId,
    owner: RecordId,
    options: LinkOptions,
    target: LinkTarget,
    /// Occurrences in the target before this transaction's changes.
    base_size: usize,
    /// Committed form before this transaction: `Some(true)` for embedded.
    was_embedded: Option<bool>,
}

#[derive(Default)]
struct CommitPlan {
    links: Vec<LinkPlan>,
    indexes: Vec<IndexDefinition>,
    /// Speculative trees nothing will reference, released in the operation.
    free: Vec<CollectionPointer>,
    /// Committed trees nothing will reference once the commit publishes.
    retire: Vec<CollectionPointer>,
    removed: Vec<(CollectionId, RecordId)>,
}

impl CommitPlan {
    fn trees(&self) -> Vec<CollectionPointer> {
        let links = self.links.iter().filter_map(|plan| match plan.target {
            LinkTarget::Tree { pointer, .. } => Some(pointer),
            LinkTarget::Embedded(_) => None,
        });
        let indexes = self.indexes.iter().map(|def| def.pointer);
        links
            .chain(indexes)
            .chain(self.free.iter().copied())
            .collect()
    }
}

impl Transaction {
    pub(crate) fn commit(&mut self) -> CoreResult<SequenceNumber> {
        self.ensure_active()?;
        if let Some(reason) = self.rollback_only.clone() {
            self.rollback_inner();
            return Err(CoreError::transaction_aborted(reason));
        }
        let shared = Arc::clone(&self.shared);
        match self.commit_inner(&shared) {
            Ok(seq) => {
                self.clear_pending();
                self.speculative.clear();
                self.state = TransactionState::Committed;
                shared.txns.finish(self.id);
                shared.reclaim();
                debug!(txn = %self.id, seq = %seq, "committed");
                Ok(seq)
            }
            Err(err) => {
                warn!(txn = %self.id, error = %err, "commit failed, rolling back");
                if matches!(err, CoreError::ConcurrencyConflict { .. }) {
                    shared.stats.record_conflict();
                }
                self.rollback_inner();
                Err(err)
            }
        }
    }

    fn commit_inner(&mut self, shared: &EngineShared) -> CoreResult<SequenceNumber> {
        self.run_hooks(shared)?;
        self.state = TransactionState::Committing;
        self.check_versions(shared)?;

        let plan = self.plan(shared)?;
        let mut owner = shared.trees.acquire(plan.trees());
        let mut op = AtomicOperation::begin(Arc::clone(shared.trees.store()));
        let mut trees = TreeLog::new();

        let upserts = self.apply_links(shared, &plan, &mut owner, &mut op, &mut trees)?;
        self.apply_indexes(&plan, &mut owner, &mut op, &mut trees)?;
        for ptr in &plan.free {
            owner.release(&mut op, *ptr)?;
        }

        let _latch = shared.txns.commit_latch();
        self.check_versions(shared)?;
        let removed: Vec<CollectionId> = plan.removed.iter().map(|(id, _)| *id).collect();
        let (seq, pages) = {
            let _gate = shared.history.publish_gate();
            let pages = owner.publish(op, shared.config.sync_on_commit)?;
            let seq = shared.txns.next_sequence();
            let mut record = CommitRecord::new(seq);
            record.trees = trees;
            record.links = shared.links.apply(upserts, &removed);
            record.records = shared.records.apply(self.record_batch(&plan));
            shared.history.push(record);
            shared.history.retire(seq, plan.retire.iter().copied());
            (seq, pages)
        };

        shared.stats.record_transaction_commit(pages);
        for _ in &plan.free {
            shared.stats.record_tree_released();
        }
        if !plan.retire.is_empty() {
            debug!(txn = %self.id, seq = %seq, trees = plan.retire.len(), "retired trees");
        }
        for link in &plan.links {
            let tree_now = matches!(link.target, LinkTarget::Tree { .. });
            match (link.was_embedded, tree_now) {
                (Some(true) | None, true) => shared.stats.record_conversion_to_tree(),
                (Some(false), false) => shared.stats.record_conversion_to_embedded(),
                _ => {}
            }
        }
        Ok(seq)
    }

    fn run_hooks(&mut self, shared: &EngineShared) -> CoreResult<()> {
        let hooks = shared.hooks.read().clone();
        if hooks.is_empty() {
            return Ok(());
        }
        let max = shared.config.max_hook_passes;
        let mut since = 0;
        let mut passes = 0;
        loop {
            let entries = self.journal.entries_since(since);
            if entries.is_empty() {
                return Ok(());
            }
            if passes == max {
                return Err(CoreError::transaction_aborted(format!(
                    "commit hooks still recording after {max} passes"
                )));
            }
            passes += 1;
            since = self.journal.next_seq();
            for hook in &hooks {
                debug!(txn = %self.id, hook = hook.name(), pass = passes, entries = entries.len(), "running commit hook");
                hook.on_commit(self, &entries)?;
            }
            if let Some(reason) = self.rollback_only.clone() {
                return Err(CoreError::transaction_aborted(reason));
            }
        }
    }

    fn check_versions(&self, shared: &EngineShared) -> CoreResult<()> {
        for (rid, version) in &self.observed {
            if shared.records.version(*rid) != Some(*version) {
                return Err(CoreError::conflict(*rid));
            }
        }
        Ok(())
    }

    /// Reports `err` as a conflict if `owner` changed since this
    /// transaction observed it.
    fn stale_or(&self, shared: &EngineShared, owner: RecordId, err: CoreError) -> CoreError {
        if shared.records.version(owner) != self.observed.get(&owner).copied() {
            CoreError::conflict(owner)
        } else {
            err
        }
    }

    fn plan(&self, shared: &EngineShared) -> CoreResult<CommitPlan> {
        let mut plan = CommitPlan::default();
        let mut kept = Vec::new();

        for logical in self.journal.touched() {
            match *logical {
                LogicalId::Links(id) => {
                    if self.deleted_collections.contains(&id) {
                        continue;
                    }
                    let (owner, options, durable) = match self.new_collections.get(&id) {
                        Some((owner, options)) => (*owner, *options, None),
                        None => {
                            let state = shared
                                .links
                                .get(id)
                                .ok_or(CoreError::CollectionNotFound { id: id.as_u64() })?;
                            (state.owner, state.options, Some(state.repr))
                        }
                    };
                    let was_embedded = durable.as_ref().map(Representation::is_embedded);
                    let (target, base_size) = match (self.link_bases.get(&id), durable) {
                        (Some(base), durable) => {
                            if let Some(old) = durable.and_then(|d| d.pointer()) {
                                plan.retire.push(old);
                            }
                            let target = match base.pointer() {
                                Some(pointer) => {
                                    kept.push(pointer);
                                    LinkTarget::Tree {
                                        pointer,
                                        fresh: true,
                                    }
                                }
                                None => LinkTarget::Embedded(Vec::new()),
                            };
                            (target, 0)
                        }
                        (None, Some(Representation::Embedded(entries))) => {
                            (LinkTarget::Embedded(entries), 0)
                        }
                        (None, Some(Representation::TreeBacked { pointer, size })) => (
                            LinkTarget::Tree {
                                pointer,
                                fresh: false,
                            },
                            size,
                        ),
                        (None, None) => {
                            return Err(CoreError::CollectionNotFound { id: id.as_u64() })
                        }
                    };
                    plan.links.push(LinkPlan {
                        id,
                        owner,
                        options,
                        target,
                        base_size,
                        was_embedded,
                    });
                }
                LogicalId::Index(id) => plan.indexes.push(shared.indexes.get(id)?),
            }
        }

        for id in &self.deleted_collections {
            if let Some(state) = shared.links.get(*id) {
                if let Some(ptr) = state.repr.pointer() {
                    plan.retire.push(ptr);
                }
                plan.removed.push((*id, state.owner));
            }
        }

        plan.free.extend(
            self.speculative
                .iter()
                .filter(|ptr| !kept.contains(ptr))
                .copied(),
        );
        for list in [&mut plan.free, &mut plan.retire] {
            list.sort();
            list.dedup();
        }
        Ok(plan)
    }

    fn apply_links(
        &self,
        shared: &EngineShared,
        plan: &CommitPlan,
        owner: &mut TreeOwnership<'_>,
        op: &mut AtomicOperation,
        trees: &mut TreeLog,
    ) -> CoreResult<Vec<(CollectionId, LinkState)>> {
        let mut upserts = Vec::with_capacity(plan.links.len());
        for link in &plan.links {
            let logical = LogicalId::Links(link.id);
            let repr = match &link.target {
                LinkTarget::Embedded(base) => {
                    let pending = self.journal.entries_in_order(logical);
                    let entries = merge_entries(base.clone(), &pending)
                        .map_err(|err| self.stale_or(shared, link.owner, err))?;
                    Representation::Embedded(entries)
                }
                LinkTarget::Tree { pointer, fresh } => {
                    for changes in self.journal.entries_for(logical) {
                        for rid in &changes.removes {
                            let entry = TreeEntry::new(changes.key.clone(), *rid);
                            if !owner.remove(op, *pointer, &entry)? {
                                let err = CoreError::consistency_violation(format!(
                                    "{rid} with count key {:?} is not stored in {}",
                                    changes.key, link.id
                                ));
                                return Err(self.stale_or(shared, link.owner, err));
                            }
                            if !fresh {
                                trees.entry(*pointer).or_default().deleted(entry);
                            }
                        }
                        for rid in &changes.puts {
                            let entry = TreeEntry::new(changes.key.clone(), *rid);
                            if !owner.insert(op, *pointer, entry.clone())? {
                                let err = CoreError::consistency_violation(format!(
                                    "{rid} with count key {:?} is already stored in {}",
                                    changes.key, link.id
                                ));
                                return Err(self.stale_or(shared, link.owner, err));
                            }
                            if !fresh {
                                trees.entry(*pointer).or_default().inserted(entry);
                            }
                        }
                    }
                    let delta = self.link_deltas.get(&link.id).copied().unwrap_or(0);
                    let size = usize::try_from(link.base_size as i64 + delta).map_err(|_| {
                        self.stale_or(
                            shared,
                            link.owner,
                            CoreError::consistency_violation(format!(
                                "{} would have a negative size",
                                link.id
                            )),
                        )
                    })?;
                    Representation::TreeBacked {
                        pointer: *pointer,
                        size,
                    }
                }
            };
            upserts.push((
                link.id,
                LinkState {
                    owner: link.owner,
                    options: link.options,
                    repr,
                },
            ));
        }
        Ok(upserts)
    }

    fn apply_indexes(
        &self,
        plan: &CommitPlan,
        owner: &mut TreeOwnership<'_>,
        op: &mut AtomicOperation,
        trees: &mut TreeLog,
    ) -> CoreResult<()> {
        for def in &plan.indexes {
            let logical = LogicalId::Index(def.id);
            let log = trees.entry(def.pointer).or_default();
            let cleared = self.journal.is_cleared(logical);
            if cleared {
                for entry in owner.scan(op, def.pointer)? {
                    if owner.remove(op, def.pointer, &entry)? {
                        log.deleted(entry);
                    }
                }
            }
            for changes in self.journal.entries_for(logical) {
                for rid in &changes.removes {
                    let entry = TreeEntry::new(changes.key.clone(), *rid);
                    if owner.remove(op, def.pointer, &entry)? {
                        log.deleted(entry);
                    } else if !cleared {
                        // Present when recorded, so another commit took it.
                        return Err(CoreError::conflict(*rid));
                    }
                }
                for rid in &changes.puts {
                    let entry = TreeEntry::new(changes.key.clone(), *rid);
                    if owner.insert(op, def.pointer, entry.clone())? {
                        log.inserted(entry);
                    }
                }
                if def.unique {
                    if let Some(&incoming) = changes.puts.last() {
                        let holders = owner.find(op, def.pointer, &changes.key)?;
                        if let Some(&existing) = holders.iter().find(|r| **r != incoming) {
                            return Err(CoreError::DuplicateUniqueKey {
                                index: def.name.clone(),
                                key: changes.key.clone(),
                                existing,
                                incoming,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn record_batch(&self, plan: &CommitPlan) -> RecordBatch {
        let mut batch = RecordBatch::default();
        for rid in &self.created {
            let mut links: Vec<CollectionId> = self
                .new_collections
                .iter()
                .filter(|(_, (owner, _))| owner == rid)
                .map(|(id, _)| *id)
                .collect();
            links.sort();
            batch.created.push((*rid, links));
        }
        for (id, (owner, _)) in &self.new_collections {
            if !self.created.contains(owner) {
                batch.links_added.push((*owner, *id));
            }
        }
        for (id, owner) in &plan.removed {
            if !self.deleted.contains(owner) {
                batch.links_removed.push((*owner, *id));
            }
        }
        batch.modified = self
            .modified
            .iter()
            .filter(|rid| !self.deleted.contains(rid))
            .copied()
            .collect();
        batch.deleted = self.deleted.iter().copied().collect();
        batch
    }
}
