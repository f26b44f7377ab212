//! Durable record metadata.

use crate::record::RecordId;
use crate::types::CollectionId;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Committed metadata of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMeta {
    /// Optimistic version, incremented by every commit that modifies the
    /// record or one of its link collections.
    pub version: u64,
    /// Link collections owned by the record.
    pub links: Vec<CollectionId>,
}

/// Record-level changes published by one commit.
#[derive(Debug, Default)]
pub(crate) struct RecordBatch {
    pub created: Vec<(RecordId, Vec<CollectionId>)>,
    pub modified: Vec<RecordId>,
    pub deleted: Vec<RecordId>,
    pub links_added: Vec<(RecordId, CollectionId)>,
    pub links_removed: Vec<(RecordId, CollectionId)>,
}

/// Table of committed records.
#[derive(Debug, Default)]
pub(crate) struct RecordTable {
    records: RwLock<HashMap<RecordId, RecordMeta>>,
}

impl RecordTable {
    pub fn get(&self, rid: RecordId) -> Option<RecordMeta> {
        self.records.read().get(&rid).cloned()
    }

    pub fn version(&self, rid: RecordId) -> Option<u64> {
        self.records.read().get(&rid).map(|m| m.version)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Applies a batch under one write lock so readers never observe half
    /// of a commit. Returns the prior metadata of every record the batch
    /// touched.
    pub fn apply(&self, batch: RecordBatch) -> HashMap<RecordId, Option<RecordMeta>> {
        let mut records = self.records.write();
        let mut before: HashMap<RecordId, Option<RecordMeta>> = HashMap::new();
        let touched = batch
            .created
            .iter()
            .map(|(rid, _)| *rid)
            .chain(batch.links_added.iter().map(|(rid, _)| *rid))
            .chain(batch.links_removed.iter().map(|(rid, _)| *rid))
            .chain(batch.modified.iter().copied())
            .chain(batch.deleted.iter().copied());
        for rid in touched {
            before
                .entry(rid)
                .or_insert_with(|| records.get(&rid).cloned());
        }

        for (rid, links) in batch.created {
            records.insert(rid, RecordMeta { version: 0, links });
        }
        for (rid, coll) in batch.links_added {
            if let Some(meta) = records.get_mut(&rid) {
                if !meta.links.contains(&coll) {
                    meta.links.push(coll);
                }
            }
        }
        for (rid, coll) in batch.links_removed {
            if let Some(meta) = records.get_mut(&rid) {
                meta.links.retain(|c| *c != coll);
            }
        }
        for rid in batch.modified {
            if let Some(meta) = records.get_mut(&rid) {
                meta.version += 1;
            }
        }
        for rid in batch.deleted {
            records.remove(&rid);
        }
        before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SegmentId;

    fn rid(position: u64) -> RecordId {
        RecordId::new(SegmentId::new(1), position)
    }

    #[test]
    fn created_records_start_at_version_zero() {
        let table = RecordTable::default();
        let before = table.apply(RecordBatch {
            created: vec![(rid(0), vec![CollectionId::new(4)])],
            ..RecordBatch::default()
        });
        assert_eq!(before[&rid(0)], None);
        let meta = table.get(rid(0)).unwrap();
        assert_eq!(meta.version, 0);
        assert_eq!(meta.links, vec![CollectionId::new(4)]);
    }

    #[test]
    fn modification_bumps_version() {
        let table = RecordTable::default();
        table.apply(RecordBatch {
            created: vec![(rid(0), Vec::new())],
            ..RecordBatch::default()
        });
        let before = table.apply(RecordBatch {
            modified: vec![rid(0)],
            links_added: vec![(rid(0), CollectionId::new(1))],
            ..RecordBatch::default()
        });
        assert_eq!(before[&rid(0)].as_ref().map(|m| m.version), Some(0));
        assert!(before[&rid(0)].as_ref().unwrap().links.is_empty());
        assert_eq!(table.version(rid(0)), Some(1));
        assert_eq!(table.get(rid(0)).unwrap().links.len(), 1);
    }

    #[test]
    fn deletion_removes_record() {
        let table = RecordTable::default();
        table.apply(RecordBatch {
            created: vec![(rid(0), Vec::new())],
            ..RecordBatch::default()
        });
        let before = table.apply(RecordBatch {
            deleted: vec![rid(0)],
            ..RecordBatch::default()
        });
        assert!(before[&rid(0)].is_some());
        assert!(table.get(rid(0)).is_none());
        assert_eq!(table.len(), 0);
    }
}
