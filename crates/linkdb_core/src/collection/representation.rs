//! Committed state of link collections.

use crate::btree::CollectionPointer;
use crate::collection::LinkOptions;
use crate::error::{CoreError, CoreResult};
use crate::record::RecordId;
use crate::types::CollectionId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Length of a member key in a link collection tree.
pub(crate) const LINK_KEY_LEN: usize = RecordId::ENCODED_LEN + 4;

/// Tree key of a member: its encoded id followed by its count.
///
/// A tree holds one entry per member, so the count travels in the key and
/// every key of one member falls inside [`link_key_bounds`].
pub(crate) fn link_key(rid: RecordId, count: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(LINK_KEY_LEN);
    key.extend_from_slice(&rid.to_bytes());
    key.extend_from_slice(&count.to_be_bytes());
    key
}

/// Smallest and largest possible key of a member.
pub(crate) fn link_key_bounds(rid: RecordId) -> (Vec<u8>, Vec<u8>) {
    (link_key(rid, 0), link_key(rid, u32::MAX))
}

/// Reads the count back out of a member key.
pub(crate) fn link_key_count(key: &[u8]) -> CoreResult<u32> {
    key.get(RecordId::ENCODED_LEN..)
        .filter(|_| key.len() == LINK_KEY_LEN)
        .and_then(|tail| tail.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| CoreError::consistency_violation("malformed link collection key"))
}

/// One distinct member of a link collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEntry {
    /// The referenced record.
    pub rid: RecordId,
    /// How many times the record was added and not yet removed.
    pub count: u32,
}

impl LinkEntry {
    /// Creates an entry.
    #[must_use]
    pub const fn new(rid: RecordId, count: u32) -> Self {
        Self { rid, count }
    }
}

/// How a link collection stores its members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Representation {
    /// Members inline. A member keeps its place while its count stays
    /// above zero; new members are appended.
    Embedded(Vec<LinkEntry>),
    /// Members in a shared tree, ordered by record id.
    TreeBacked {
        /// The collection's tree.
        pointer: CollectionPointer,
        /// Cached number of occurrences.
        size: usize,
    },
}

impl Representation {
    /// Returns the number of occurrences, counting repeated members.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Embedded(entries) => entries.iter().map(|e| e.count as usize).sum(),
            Self::TreeBacked { size, .. } => *size,
        }
    }

    /// Returns true if the collection has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true for the inline form.
    #[must_use]
    pub fn is_embedded(&self) -> bool {
        matches!(self, Self::Embedded(_))
    }

    /// Returns the tree pointer of a tree-backed collection.
    #[must_use]
    pub fn pointer(&self) -> Option<CollectionPointer> {
        match self {
            Self::Embedded(_) => None,
            Self::TreeBacked { pointer, .. } => Some(*pointer),
        }
    }
}

/// Committed state of one link collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LinkState {
    pub owner: RecordId,
    pub options: LinkOptions,
    pub repr: Representation,
}

/// Table of committed link collections.
#[derive(Debug)]
pub(crate) struct LinkTable {
    next_id: AtomicU64,
    states: RwLock<HashMap<CollectionId, LinkState>>,
}

impl Default for LinkTable {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            states: RwLock::new(HashMap::new()),
        }
    }
}

impl LinkTable {
    /// Hands out a collection id. Ids are never reused.
    pub fn allocate_id(&self) -> CollectionId {
        CollectionId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn get(&self, id: CollectionId) -> Option<LinkState> {
        self.states.read().get(&id).cloned()
    }

    /// Publishes the changes of one commit and returns the prior state of
    /// every collection it touched.
    pub fn apply(
        &self,
        upserts: Vec<(CollectionId, LinkState)>,
        removed: &[CollectionId],
    ) -> HashMap<CollectionId, Option<LinkState>> {
        let mut states = self.states.write();
        let mut before = HashMap::new();
        for (id, state) in upserts {
            let prior = states.insert(id, state);
            before.entry(id).or_insert(prior);
        }
        for id in removed {
            let prior = states.remove(id);
            before.entry(*id).or_insert(prior);
        }
        before
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::ConversionPolicy;
    use crate::types::SegmentId;
    use linkdb_storage::{FileId, PageIndex};

    fn rid(position: u64) -> RecordId {
        RecordId::new(SegmentId::new(1), position)
    }

    #[test]
    fn representation_counts_occurrences() {
        let embedded =
            Representation::Embedded(vec![LinkEntry::new(rid(1), 1), LinkEntry::new(rid(2), 3)]);
        assert_eq!(embedded.len(), 4);
        assert!(embedded.is_embedded());
        assert_eq!(embedded.pointer(), None);

        let pointer = CollectionPointer::new(FileId::new(1), PageIndex::new(0));
        let tree = Representation::TreeBacked { pointer, size: 9 };
        assert_eq!(tree.len(), 9);
        assert_eq!(tree.pointer(), Some(pointer));
    }

    #[test]
    fn member_keys_sort_by_record_then_count() {
        let (lo, hi) = link_key_bounds(rid(7));
        let key = link_key(rid(7), 3);
        assert!(lo < key && key < hi);
        assert!(link_key(rid(7), u32::MAX) < link_key(rid(8), 0));
        assert_eq!(link_key_count(&key).unwrap(), 3);
        assert!(link_key_count(&rid(7).to_bytes()).is_err());
    }

    #[test]
    fn table_apply_reports_prior_state() {
        let table = LinkTable::default();
        let a = table.allocate_id();
        let b = table.allocate_id();
        assert_ne!(a, b);

        let state = LinkState {
            owner: rid(0),
            options: LinkOptions::from(ConversionPolicy::default()),
            repr: Representation::Embedded(vec![LinkEntry::new(rid(1), 1)]),
        };
        let before = table.apply(vec![(a, state.clone()), (b, state.clone())], &[]);
        assert_eq!(before[&a], None);
        assert_eq!(table.len(), 2);

        let before = table.apply(Vec::new(), &[a]);
        assert_eq!(before[&a], Some(state));
        assert!(table.get(a).is_none());
        assert_eq!(table.get(b).unwrap().owner, rid(0));
    }
}
