//! Transaction-scoped handle to one link collection.

use crate::btree::CollectionPointer;
use crate::collection::LinkEntry;
use crate::error::CoreResult;
use crate::record::RecordId;
use crate::transaction::Transaction;
use crate::types::CollectionId;

/// A link collection as seen by one transaction.
///
/// Reads combine the members committed as of the transaction's snapshot
/// with its pending changes. Mutations are journaled and may switch the
/// representation immediately; `size` and `is_embedded` reflect the switch.
///
/// Adding a member again raises its count until the collection's
/// `counter_max` is reached; `size` counts every occurrence.
///
/// # Example
///
/// ```rust
/// use linkdb_core::{ConversionPolicy, Engine, LinkOptions};
///
/// let engine = Engine::open_in_memory().unwrap();
/// let people = engine.create_segment("Person", false).unwrap();
///
/// let mut tx = engine.begin().unwrap();
/// let alice = tx.create_record(people).unwrap();
/// let bob = tx.create_record(people).unwrap();
/// let visits = tx.create_link_collection(alice).unwrap();
/// let friends = tx
///     .create_link_collection_with(alice, LinkOptions::set(ConversionPolicy::default()))
///     .unwrap();
///
/// let mut links = tx.links(visits).unwrap();
/// assert!(links.add(bob).unwrap());
/// assert!(links.add(bob).unwrap());
/// assert_eq!(links.count(bob).unwrap(), 2);
/// assert_eq!(links.size().unwrap(), 2);
///
/// let mut links = tx.links(friends).unwrap();
/// assert!(links.add(bob).unwrap());
/// assert!(!links.add(bob).unwrap());
/// assert_eq!(links.size().unwrap(), 1);
/// engine.commit(&mut tx).unwrap();
/// ```
pub struct LinkCollection<'tx> {
    tx: &'tx mut Transaction,
    id: CollectionId,
}

impl<'tx> LinkCollection<'tx> {
    pub(crate) fn new(tx: &'tx mut Transaction, id: CollectionId) -> Self {
        Self { tx, id }
    }

    /// Returns the collection id.
    #[must_use]
    pub fn id(&self) -> CollectionId {
        self.id
    }

    /// Adds one occurrence of a member. Returns false if its count is
    /// already at the collection's cap.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation`](crate::CoreError::SchemaViolation) if `rid` is
    /// not a live record, and
    /// [`StorageAllocationFailure`](crate::CoreError::StorageAllocationFailure)
    /// if a conversion to tree form cannot get a page. The transaction is
    /// then rollback-only.
    pub fn add(&mut self, rid: RecordId) -> CoreResult<bool> {
        self.tx.link_add(self.id, rid)
    }

    /// Removes one occurrence of a member. Returns false if it was absent.
    pub fn remove(&mut self, rid: RecordId) -> CoreResult<bool> {
        self.tx.link_remove(self.id, rid)
    }

    /// Returns true if `rid` is a member.
    pub fn contains(&self, rid: RecordId) -> CoreResult<bool> {
        self.tx.link_contains(self.id, rid)
    }

    /// Returns how many times `rid` is a member.
    pub fn count(&self, rid: RecordId) -> CoreResult<u32> {
        self.tx.link_count(self.id, rid)
    }

    /// Returns the number of occurrences, counting repeated members.
    pub fn size(&self) -> CoreResult<usize> {
        self.tx.link_size(self.id)
    }

    /// Returns true if there are no members.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.size()? == 0)
    }

    /// Returns true while the collection is stored inline.
    pub fn is_embedded(&self) -> CoreResult<bool> {
        Ok(self.tx.link_pointer(self.id)?.is_none())
    }

    /// Returns the tree pointer while the collection is tree-backed.
    pub fn pointer(&self) -> CoreResult<Option<CollectionPointer>> {
        self.tx.link_pointer(self.id)
    }

    /// Returns the distinct members with their counts. Embedded collections
    /// keep the order of first addition; tree-backed ones are ordered by
    /// record id.
    pub fn entries(&self) -> CoreResult<Vec<LinkEntry>> {
        self.tx.link_entries(self.id)
    }

    /// Returns every occurrence, in [`entries`](Self::entries) order with
    /// repeated members listed once per count.
    pub fn members(&self) -> CoreResult<Vec<RecordId>> {
        self.tx.link_members(self.id)
    }

    /// Starts a traversal over a snapshot of the current occurrences.
    ///
    /// Later mutations do not affect an iterator already handed out; call
    /// `iter` again to see them.
    pub fn iter(&self) -> CoreResult<LinkIter> {
        Ok(LinkIter {
            inner: self.members()?.into_iter(),
        })
    }
}

impl std::fmt::Debug for LinkCollection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkCollection")
            .field("id", &self.id)
            .field("tx", &self.tx.id())
            .finish()
    }
}

/// Iterator over a snapshot of link collection members.
#[derive(Debug, Clone)]
pub struct LinkIter {
    inner: std::vec::IntoIter<RecordId>,
}

impl Iterator for LinkIter {
    type Item = RecordId;

    fn next(&mut self) -> Option<RecordId> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for LinkIter {}
