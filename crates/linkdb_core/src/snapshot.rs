//! Commit history and snapshot reads.
//!
//! Trees and the record and link tables are updated in place. Every commit
//! also leaves a [`CommitRecord`]: the prior rows of the tables it changed
//! and the entries it added to or removed from each tree that was already
//! reachable. A transaction reads the current state and undoes every
//! commit newer than its snapshot.
//!
//! Records are pruned once no active transaction is older than them.
//! Trees a commit stops referencing are retired rather than freed and are
//! released at the same point, so an older snapshot never reads a page
//! that was handed out again.

use crate::btree::{CollectionPointer, TreeEntry};
use crate::collection::LinkState;
use crate::engine::EngineShared;
use crate::error::CoreResult;
use crate::record::{RecordId, RecordMeta};
use crate::types::{CollectionId, SequenceNumber};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Net entries one commit added to and removed from a tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TreeChanges {
    pub added: BTreeSet<TreeEntry>,
    pub removed: BTreeSet<TreeEntry>,
}

impl TreeChanges {
    /// Notes an entry that was inserted.
    pub fn inserted(&mut self, entry: TreeEntry) {
        if !self.removed.remove(&entry) {
            self.added.insert(entry);
        }
    }

    /// Notes an entry that was removed.
    pub fn deleted(&mut self, entry: TreeEntry) {
        if !self.added.remove(&entry) {
            self.removed.insert(entry);
        }
    }

    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// What one commit changed, as needed to undo it for older snapshots.
#[derive(Debug)]
pub(crate) struct CommitRecord {
    pub seq: SequenceNumber,
    pub trees: HashMap<CollectionPointer, TreeChanges>,
    pub records: HashMap<RecordId, Option<RecordMeta>>,
    pub links: HashMap<CollectionId, Option<LinkState>>,
}

impl CommitRecord {
    pub fn new(seq: SequenceNumber) -> Self {
        Self {
            seq,
            trees: HashMap::new(),
            records: HashMap::new(),
            links: HashMap::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.trees.values().all(TreeChanges::is_empty)
            && self.records.is_empty()
            && self.links.is_empty()
    }
}

/// Undo information for commits that active snapshots cannot see yet.
///
/// The gate is held shared by snapshot reads and by `begin`, and
/// exclusively while a commit publishes its pages, tables and record, so a
/// reader always sees the current state and the history that matches it.
#[derive(Debug, Default)]
pub(crate) struct CommitHistory {
    gate: RwLock<()>,
    commits: RwLock<VecDeque<CommitRecord>>,
    retired: Mutex<Vec<(SequenceNumber, CollectionPointer)>>,
}

impl CommitHistory {
    /// Shared side of the gate. Recursive so nested reads cannot block
    /// behind a waiting publisher.
    pub fn read_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read_recursive()
    }

    pub fn publish_gate(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write()
    }

    /// Appends a commit's record. Call with the publish gate held.
    pub fn push(&self, record: CommitRecord) {
        if !record.is_empty() {
            self.commits.write().push_back(record);
        }
    }

    /// Schedules trees that the commit at `seq` stopped referencing.
    pub fn retire(&self, seq: SequenceNumber, trees: impl IntoIterator<Item = CollectionPointer>) {
        self.retired
            .lock()
            .extend(trees.into_iter().map(|ptr| (seq, ptr)));
    }

    /// Number of commit records kept.
    pub fn len(&self) -> usize {
        self.commits.read().len()
    }

    /// Number of trees waiting to be released.
    pub fn retired_len(&self) -> usize {
        self.retired.lock().len()
    }

    /// Drops records every snapshot at or after `oldest` can see and returns
    /// the retired trees none of them references.
    pub fn prune(&self, oldest: SequenceNumber) -> Vec<CollectionPointer> {
        {
            let mut commits = self.commits.write();
            while commits.front().is_some_and(|c| c.seq <= oldest) {
                commits.pop_front();
            }
        }
        let mut retired = self.retired.lock();
        let (ready, waiting): (Vec<_>, Vec<_>) =
            retired.drain(..).partition(|(seq, _)| *seq <= oldest);
        *retired = waiting;
        ready.into_iter().map(|(_, ptr)| ptr).collect()
    }

    /// Value of a row as of `snapshot`: the prior image kept by the oldest
    /// newer commit that touched it, or `current` if none did.
    fn row_at<V: Clone>(
        &self,
        snapshot: SequenceNumber,
        current: Option<V>,
        lookup: impl Fn(&CommitRecord) -> Option<&Option<V>>,
    ) -> Option<V> {
        let commits = self.commits.read();
        commits
            .iter()
            .filter(|c| c.seq > snapshot)
            .find_map(|c| lookup(c).cloned())
            .unwrap_or(current)
    }

    fn record_at(
        &self,
        rid: RecordId,
        snapshot: SequenceNumber,
        current: Option<RecordMeta>,
    ) -> Option<RecordMeta> {
        self.row_at(snapshot, current, |c| c.records.get(&rid))
    }

    fn link_at(
        &self,
        id: CollectionId,
        snapshot: SequenceNumber,
        current: Option<LinkState>,
    ) -> Option<LinkState> {
        self.row_at(snapshot, current, |c| c.links.get(&id))
    }

    /// Rewinds `entries`, the current content of `ptr` restricted to
    /// `keep`, to its content as of `snapshot`.
    fn undo_tree(
        &self,
        ptr: CollectionPointer,
        snapshot: SequenceNumber,
        entries: Vec<TreeEntry>,
        keep: impl Fn(&TreeEntry) -> bool,
    ) -> Vec<TreeEntry> {
        let commits = self.commits.read();
        let newer: Vec<&TreeChanges> = commits
            .iter()
            .rev()
            .take_while(|c| c.seq > snapshot)
            .filter_map(|c| c.trees.get(&ptr))
            .collect();
        if newer.is_empty() {
            return entries;
        }
        let mut set: BTreeSet<TreeEntry> = entries.into_iter().collect();
        for changes in newer {
            for entry in changes.added.iter().filter(|e| keep(e)) {
                set.remove(entry);
            }
            for entry in changes.removed.iter().filter(|e| keep(e)) {
                set.insert(entry.clone());
            }
        }
        set.into_iter().collect()
    }
}

/// Committed state as of one sequence number.
///
/// Holds the shared side of the history gate for its lifetime; keep it
/// short-lived.
pub(crate) struct SnapshotView<'a> {
    shared: &'a EngineShared,
    seq: SequenceNumber,
    _gate: RwLockReadGuard<'a, ()>,
}

impl<'a> SnapshotView<'a> {
    pub fn new(shared: &'a EngineShared, seq: SequenceNumber) -> Self {
        Self {
            _gate: shared.history.read_gate(),
            shared,
            seq,
        }
    }

    /// Record metadata as of the snapshot.
    pub fn record(&self, rid: RecordId) -> Option<RecordMeta> {
        self.shared
            .history
            .record_at(rid, self.seq, self.shared.records.get(rid))
    }

    /// Link collection state as of the snapshot.
    pub fn link(&self, id: CollectionId) -> Option<LinkState> {
        self.shared
            .history
            .link_at(id, self.seq, self.shared.links.get(id))
    }

    /// Entries of a tree with keys in `lo..=hi`, in tree order.
    pub fn tree_range(
        &self,
        ptr: CollectionPointer,
        lo: &[u8],
        hi: &[u8],
    ) -> CoreResult<Vec<TreeEntry>> {
        let current = self.shared.trees.load_isolated_tree(ptr)?.range(lo, hi)?;
        Ok(self.shared.history.undo_tree(ptr, self.seq, current, |e| {
            e.key.as_slice() >= lo && e.key.as_slice() <= hi
        }))
    }

    /// Every entry of a tree, in tree order.
    pub fn tree_scan(&self, ptr: CollectionPointer) -> CoreResult<Vec<TreeEntry>> {
        let current = self.shared.trees.load_isolated_tree(ptr)?.entries()?;
        Ok(self.shared.history.undo_tree(ptr, self.seq, current, |_| true))
    }
}
