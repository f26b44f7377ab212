//! Transaction state.

use crate::btree::CollectionPointer;
use crate::collection::{LinkCollection, LinkOptions, Representation};
use crate::engine::EngineShared;
use crate::error::{CoreError, CoreResult};
use crate::journal::{JournalEntry, JournalOp, LogicalId, MutationJournal, RecordOutcome};
use crate::record::{RecordId, RecordMeta};
use crate::snapshot::SnapshotView;
use crate::types::{CollectionId, SegmentId, SequenceNumber, TransactionId};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Commit is applying the journal.
    Committing,
    /// Transaction has been committed.
    Committed,
    /// Rollback is releasing speculative resources.
    RollingBack,
    /// Transaction has been aborted.
    Aborted,
}

/// An active transaction.
///
/// All link and index mutations are buffered in the transaction's
/// [`MutationJournal`] and reads merge it with the state committed as of
/// [`begin`](crate::Engine::begin). Commits made after that point stay
/// invisible, and nothing this transaction does is visible to others
/// before commit.
///
/// Dropping an active transaction rolls it back.
pub struct Transaction {
    pub(super) id: TransactionId,
    /// Latest commit visible to this transaction.
    pub(super) snapshot: SequenceNumber,
    pub(super) shared: Arc<EngineShared>,
    pub(super) state: TransactionState,
    /// Set when an operation failed in a way that forbids commit.
    pub(super) rollback_only: Option<String>,
    pub(super) journal: MutationJournal,
    /// Snapshot versions this transaction relied on.
    pub(super) observed: HashMap<RecordId, u64>,
    /// Committed records whose version commit must bump.
    pub(super) modified: BTreeSet<RecordId>,
    pub(super) created: BTreeSet<RecordId>,
    pub(super) deleted: BTreeSet<RecordId>,
    pub(super) new_collections: HashMap<CollectionId, (RecordId, LinkOptions)>,
    pub(super) deleted_collections: BTreeSet<CollectionId>,
    /// Replacement base representations installed by conversions. A
    /// replacement always starts empty; its members are re-expressed as
    /// journal PUTs.
    pub(super) link_bases: HashMap<CollectionId, Representation>,
    /// Occurrences added minus removed since each collection's base.
    pub(super) link_deltas: HashMap<CollectionId, i64>,
    /// Trees created by this transaction.
    pub(super) speculative: Vec<CollectionPointer>,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, snapshot: SequenceNumber, shared: Arc<EngineShared>) -> Self {
        Self {
            id,
            snapshot,
            shared,
            state: TransactionState::Active,
            rollback_only: None,
            journal: MutationJournal::new(),
            observed: HashMap::new(),
            modified: BTreeSet::new(),
            created: BTreeSet::new(),
            deleted: BTreeSet::new(),
            new_collections: HashMap::new(),
            deleted_collections: BTreeSet::new(),
            link_bases: HashMap::new(),
            link_deltas: HashMap::new(),
            speculative: Vec::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the sequence number of the latest commit this transaction
    /// can see.
    #[must_use]
    pub fn snapshot_seq(&self) -> SequenceNumber {
        self.snapshot
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns the reason commit will refuse this transaction, if any.
    #[must_use]
    pub fn rollback_only(&self) -> Option<&str> {
        self.rollback_only.as_deref()
    }

    /// Returns the pending mutations.
    #[must_use]
    pub fn journal(&self) -> &MutationJournal {
        &self.journal
    }

    pub(super) fn snapshot(&self) -> SnapshotView<'_> {
        SnapshotView::new(&self.shared, self.snapshot)
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<EngineShared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    pub(super) fn ensure_active(&self) -> CoreResult<()> {
        if self.state != TransactionState::Active {
            return Err(CoreError::invalid_operation(format!(
                "transaction {} is {:?}",
                self.id, self.state
            )));
        }
        Ok(())
    }

    pub(super) fn mark_rollback_only(&mut self, err: &CoreError) {
        if self.rollback_only.is_none() {
            warn!(txn = %self.id, error = %err, "transaction marked rollback-only");
            self.rollback_only = Some(err.to_string());
        }
    }

    /// Remembers the snapshot version of `rid` for the commit-time check.
    pub(super) fn observe(&mut self, rid: RecordId) {
        if self.created.contains(&rid) || self.observed.contains_key(&rid) {
            return;
        }
        let meta = self.snapshot().record(rid);
        if let Some(meta) = meta {
            self.observed.insert(rid, meta.version);
        }
    }

    /// Marks a committed record as modified by this transaction.
    pub(super) fn touch(&mut self, rid: RecordId) {
        self.observe(rid);
        if !self.created.contains(&rid) {
            self.modified.insert(rid);
        }
    }

    /// Returns true if `rid` is live from this transaction's point of view.
    #[must_use]
    pub fn record_exists(&self, rid: RecordId) -> bool {
        if self.deleted.contains(&rid) {
            return false;
        }
        self.created.contains(&rid) || self.snapshot().record(rid).is_some()
    }

    /// Creates a record in a concrete segment.
    ///
    /// # Errors
    ///
    /// [`CoreError::SchemaViolation`] for unknown or abstract segments.
    pub fn create_record(&mut self, segment: SegmentId) -> CoreResult<RecordId> {
        self.ensure_active()?;
        let position = self.shared.schema.allocate_position(segment)?;
        let rid = RecordId::new(segment, position);
        self.created.insert(rid);
        trace!(txn = %self.id, record = %rid, "created record");
        Ok(rid)
    }

    /// Marks a record as changed so commit bumps its version.
    pub fn update_record(&mut self, rid: RecordId) -> CoreResult<()> {
        self.ensure_active()?;
        if !self.record_exists(rid) {
            return Err(CoreError::RecordNotFound { record: rid });
        }
        self.touch(rid);
        Ok(())
    }

    /// Reads record metadata, including this transaction's collection
    /// changes, and remembers its committed version.
    pub fn read_record(&mut self, rid: RecordId) -> CoreResult<RecordMeta> {
        self.ensure_active()?;
        if !self.record_exists(rid) {
            return Err(CoreError::RecordNotFound { record: rid });
        }
        self.observe(rid);
        let mut meta = self.snapshot().record(rid).unwrap_or(RecordMeta {
            version: 0,
            links: Vec::new(),
        });
        meta.links.retain(|id| !self.deleted_collections.contains(id));
        let mut added: Vec<CollectionId> = self
            .new_collections
            .iter()
            .filter(|(_, (owner, _))| *owner == rid)
            .map(|(id, _)| *id)
            .collect();
        added.sort();
        meta.links.extend(added);
        Ok(meta)
    }

    /// Deletes a record together with every link collection it owns and
    /// every index entry that refers to it.
    pub fn delete_record(&mut self, rid: RecordId) -> CoreResult<()> {
        self.ensure_active()?;
        if !self.record_exists(rid) {
            return Err(CoreError::RecordNotFound { record: rid });
        }
        for def in self.shared.indexes.for_segment(rid.segment()) {
            for key in self.index_keys_of(&def, rid)? {
                self.index_record(def.id, key, rid, JournalOp::Remove)?;
            }
        }
        let owned = self.read_record(rid)?.links;
        for id in owned {
            self.drop_collection(id);
        }
        if !self.created.remove(&rid) {
            self.observe(rid);
            self.modified.remove(&rid);
            self.deleted.insert(rid);
        }
        trace!(txn = %self.id, record = %rid, "deleted record");
        Ok(())
    }

    /// Creates a link collection owned by `rid` with the engine's default
    /// options.
    pub fn create_link_collection(&mut self, owner: RecordId) -> CoreResult<CollectionId> {
        let options = self.shared.config.link_options();
        self.create_link_collection_with(owner, options)
    }

    /// Creates a link collection owned by `rid`.
    ///
    /// Accepts [`LinkOptions`] or a bare
    /// [`ConversionPolicy`](crate::ConversionPolicy), which leaves counts
    /// unbounded.
    pub fn create_link_collection_with(
        &mut self,
        owner: RecordId,
        options: impl Into<LinkOptions>,
    ) -> CoreResult<CollectionId> {
        self.ensure_active()?;
        if !self.record_exists(owner) {
            return Err(CoreError::schema_violation(format!(
                "cannot create a link collection for missing record {owner}"
            )));
        }
        let id = self.shared.links.allocate_id();
        self.new_collections.insert(id, (owner, options.into()));
        self.link_bases.insert(id, Representation::Embedded(Vec::new()));
        // Touch so commit publishes the collection even if it stays empty.
        self.journal.reset(LogicalId::Links(id));
        self.touch(owner);
        Ok(id)
    }

    /// Deletes a link collection. Its tree, if any, is released at commit.
    pub fn delete_link_collection(&mut self, id: CollectionId) -> CoreResult<()> {
        self.ensure_active()?;
        let owner = self.link_view(id)?.owner;
        self.touch(owner);
        self.drop_collection(id);
        Ok(())
    }

    fn drop_collection(&mut self, id: CollectionId) {
        self.journal.reset(LogicalId::Links(id));
        self.link_bases.remove(&id);
        self.link_deltas.remove(&id);
        self.new_collections.remove(&id);
        self.deleted_collections.insert(id);
    }

    /// Opens a link collection.
    ///
    /// # Errors
    ///
    /// [`CoreError::CollectionNotFound`] if the collection does not exist or
    /// was deleted.
    pub fn links(&mut self, id: CollectionId) -> CoreResult<LinkCollection<'_>> {
        self.ensure_active()?;
        let owner = self.link_view(id)?.owner;
        self.observe(owner);
        Ok(LinkCollection::new(self, id))
    }

    /// Records a raw index operation.
    ///
    /// Link collections keep per-member counts and are mutated through
    /// [`links`](Self::links) instead.
    pub fn record(
        &mut self,
        logical: LogicalId,
        key: &[u8],
        rid: RecordId,
        op: JournalOp,
    ) -> CoreResult<RecordOutcome> {
        match logical {
            LogicalId::Index(index) => self.index_record(index, key.to_vec(), rid, op),
            LogicalId::Links(id) => Err(CoreError::invalid_operation(format!(
                "{id} is a link collection; use Transaction::links"
            ))),
        }
    }

    /// Returns the records associated with `key`, merging committed state
    /// with this transaction's pending entries. For link collections the
    /// key is an encoded member id and the member is listed once per
    /// occurrence.
    pub fn merged_view(&self, logical: LogicalId, key: &[u8]) -> CoreResult<Vec<RecordId>> {
        match logical {
            LogicalId::Index(index) => self.index_lookup(index, key),
            LogicalId::Links(id) => {
                let rid = RecordId::from_bytes(key)
                    .filter(|_| key.len() == RecordId::ENCODED_LEN)
                    .ok_or_else(|| CoreError::invalid_format("link key is not a record id"))?;
                Ok(vec![rid; self.link_count(id, rid)? as usize])
            }
        }
    }

    /// Entries recorded at or after `seq`, for commit hooks.
    #[must_use]
    pub fn entries_since(&self, seq: u64) -> Vec<JournalEntry> {
        self.journal.entries_since(seq)
    }

    /// Releases speculative trees and discards all pending work.
    pub(crate) fn rollback_inner(&mut self) {
        self.state = TransactionState::RollingBack;
        for ptr in std::mem::take(&mut self.speculative) {
            match self.shared.trees.release_tree(ptr) {
                Ok(()) => self.shared.stats.record_tree_released(),
                Err(err) => warn!(txn = %self.id, pointer = %ptr, error = %err, "failed to release speculative tree"),
            }
        }
        self.clear_pending();
        self.state = TransactionState::Aborted;
        self.shared.txns.finish(self.id);
        self.shared.stats.record_transaction_abort();
        self.shared.reclaim();
    }

    pub(super) fn clear_pending(&mut self) {
        self.journal.discard();
        self.observed.clear();
        self.modified.clear();
        self.created.clear();
        self.deleted.clear();
        self.new_collections.clear();
        self.deleted_collections.clear();
        self.link_bases.clear();
        self.link_deltas.clear();
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            self.rollback_inner();
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("pending", &self.journal.len())
            .finish_non_exhaustive()
    }
}
