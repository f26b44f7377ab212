//! Reference model of link collections.
//!
//! [`LinkHarness`] drives one collection through the engine and a plain
//! counted map side by side, and checks that they agree after every
//! commit.

use crate::generators::LinkOperation;
use linkdb_core::{
    CollectionId, CoreResult, Engine, LinkEntry, LinkOptions, RecordId, SegmentId, Threshold,
};
use std::collections::BTreeMap;

/// Expected state of one link collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkModel {
    /// Count of every member.
    pub counts: BTreeMap<RecordId, u32>,
    /// Whether the collection should be tree-backed.
    pub tree: bool,
}

impl LinkModel {
    /// Returns the number of occurrences.
    pub fn size(&self) -> usize {
        self.counts.values().map(|&c| c as usize).sum()
    }

    /// Returns the count of one member.
    pub fn count(&self, rid: RecordId) -> u32 {
        self.counts.get(&rid).copied().unwrap_or(0)
    }

    /// Applies one operation, returning whether the collection changed.
    pub fn apply(&mut self, options: &LinkOptions, rid: RecordId, add: bool) -> bool {
        let count = self.count(rid);
        let changed = if add {
            count < options.counter_max
        } else {
            count > 0
        };
        if !changed {
            return false;
        }
        match (add, count) {
            (true, _) => {
                self.counts.insert(rid, count + 1);
            }
            (false, 1) => {
                self.counts.remove(&rid);
            }
            (false, _) => {
                self.counts.insert(rid, count - 1);
            }
        }
        let size = self.size();
        if add && !self.tree {
            self.tree = matches!(options.policy.to_tree(), Threshold::At(limit) if size > limit);
        } else if !add && self.tree {
            self.tree =
                !matches!(options.policy.to_embedded(), Threshold::At(limit) if size <= limit);
        }
        true
    }

    /// Returns the expected entries, ordered by record id.
    pub fn entries(&self) -> Vec<LinkEntry> {
        self.counts
            .iter()
            .map(|(&rid, &count)| LinkEntry::new(rid, count))
            .collect()
    }
}

/// A test harness comparing a link collection against [`LinkModel`].
pub struct LinkHarness {
    /// The engine under test.
    pub engine: Engine,
    /// The collection's options.
    pub options: LinkOptions,
    /// Segment of every record.
    pub segment: SegmentId,
    /// Owner of the collection.
    pub owner: RecordId,
    /// The collection.
    pub collection: CollectionId,
    /// Records the operations address by slot.
    pub pool: Vec<RecordId>,
    model: LinkModel,
}

impl LinkHarness {
    /// Creates a segment, an owner, a pool of records and an empty
    /// collection with `options`.
    pub fn new(
        engine: Engine,
        segment_name: &str,
        pool: usize,
        options: impl Into<LinkOptions>,
    ) -> Self {
        let options = options.into();
        let segment = engine
            .create_segment(segment_name, false)
            .expect("Failed to create segment");
        let (owner, collection, pool) = engine
            .transaction(|tx| {
                let owner = tx.create_record(segment)?;
                let pool = (0..pool)
                    .map(|_| tx.create_record(segment))
                    .collect::<CoreResult<Vec<_>>>()?;
                let collection = tx.create_link_collection_with(owner, options)?;
                Ok((owner, collection, pool))
            })
            .expect("Failed to set up harness");
        Self {
            engine,
            options,
            segment,
            owner,
            collection,
            pool,
            model: LinkModel::default(),
        }
    }

    /// Returns the expected state.
    pub fn model(&self) -> &LinkModel {
        &self.model
    }

    /// Runs `ops` in one transaction and commits it. The model follows
    /// only if the commit succeeds.
    pub fn commit_batch(&mut self, ops: &[LinkOperation]) -> CoreResult<()> {
        let mut expected = self.model.clone();
        let collection = self.collection;
        let pool = self.pool.clone();
        let options = self.options;
        self.engine.transaction(|tx| {
            let mut links = tx.links(collection)?;
            for op in ops {
                let (rid, add) = match *op {
                    LinkOperation::Add(slot) => (pool[slot], true),
                    LinkOperation::Remove(slot) => (pool[slot], false),
                };
                let changed = if add {
                    links.add(rid)?
                } else {
                    links.remove(rid)?
                };
                let modelled = expected.apply(&options, rid, add);
                assert_eq!(changed, modelled, "Change mismatch for {op:?}");
                assert_eq!(links.count(rid)?, expected.count(rid), "Count mismatch after {op:?}");
                assert_eq!(links.size()?, expected.size());
                assert_eq!(links.is_embedded()?, !expected.tree, "Form mismatch after {op:?}");
            }
            Ok(())
        })?;
        self.model = expected;
        Ok(())
    }

    /// Runs `ops` in one transaction and rolls it back.
    pub fn rollback_batch(&mut self, ops: &[LinkOperation]) -> CoreResult<()> {
        let mut tx = self.engine.begin()?;
        {
            let mut links = tx.links(self.collection)?;
            for op in ops {
                match *op {
                    LinkOperation::Add(slot) => links.add(self.pool[slot])?,
                    LinkOperation::Remove(slot) => links.remove(self.pool[slot])?,
                };
            }
        }
        self.engine.rollback(&mut tx)
    }

    /// Verifies committed state against the model.
    pub fn verify(&self) {
        let repr = self
            .engine
            .link_representation(self.collection)
            .expect("Collection should exist");
        assert_eq!(repr.len(), self.model.size(), "Size mismatch");
        assert_eq!(repr.is_embedded(), !self.model.tree, "Form mismatch");

        if let Some(pointer) = repr.pointer() {
            let tree = self
                .engine
                .load_isolated_tree(pointer)
                .expect("Tree should load");
            assert_eq!(
                tree.size().expect("Tree size") as usize,
                self.model.counts.len(),
                "A tree holds one entry per member"
            );
        }

        let mut tx = self.engine.begin().expect("Failed to begin");
        let mut entries = tx
            .links(self.collection)
            .and_then(|links| links.entries())
            .expect("Failed to read entries");
        entries.sort_by_key(|e| e.rid);
        assert_eq!(entries, self.model.entries(), "Member mismatch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestEngine;
    use linkdb_core::ConversionPolicy;

    fn rid(position: u64) -> RecordId {
        RecordId::new(SegmentId::new(1), position)
    }

    #[test]
    fn test_model_conversions() {
        let options = LinkOptions::set(ConversionPolicy::new(2, 1).unwrap());
        let mut model = LinkModel::default();
        assert!(model.apply(&options, rid(1), true));
        assert!(model.apply(&options, rid(2), true));
        assert!(!model.tree);
        assert!(model.apply(&options, rid(3), true));
        assert!(model.tree);
        assert!(!model.apply(&options, rid(3), true));
        assert!(model.apply(&options, rid(3), false));
        assert!(model.tree);
        assert!(model.apply(&options, rid(2), false));
        assert!(!model.tree);
    }

    #[test]
    fn test_model_counts() {
        let options = LinkOptions::new(ConversionPolicy::new(2, 0).unwrap()).counter_max(3);
        let mut model = LinkModel::default();
        for _ in 0..3 {
            assert!(model.apply(&options, rid(1), true));
        }
        assert!(!model.apply(&options, rid(1), true));
        assert_eq!(model.count(rid(1)), 3);
        assert_eq!(model.size(), 3);
        assert!(model.tree);

        assert!(model.apply(&options, rid(1), false));
        assert!(model.apply(&options, rid(1), false));
        assert!(model.tree);
        assert!(model.apply(&options, rid(1), false));
        assert!(!model.tree);
        assert!(model.counts.is_empty());
        assert!(!model.apply(&options, rid(1), false));
    }

    #[test]
    fn test_harness_round() {
        let test_engine = TestEngine::memory();
        let mut harness = LinkHarness::new(
            test_engine.engine.clone(),
            "Harness",
            6,
            ConversionPolicy::new(3, 1).unwrap(),
        );
        let adds: Vec<_> = (0..5).map(LinkOperation::Add).collect();
        harness.commit_batch(&adds).unwrap();
        harness.verify();
        assert!(harness.model().tree);

        harness.rollback_batch(&[LinkOperation::Remove(0)]).unwrap();
        harness.verify();

        let removes: Vec<_> = (0..4).map(LinkOperation::Remove).collect();
        harness.commit_batch(&removes).unwrap();
        harness.verify();
        assert!(!harness.model().tree);
    }

    #[test]
    fn test_harness_repeats() {
        let test_engine = TestEngine::memory();
        let mut harness = LinkHarness::new(
            test_engine.engine.clone(),
            "Repeats",
            2,
            LinkOptions::new(ConversionPolicy::new(3, 1).unwrap()).counter_max(4),
        );
        let adds = vec![LinkOperation::Add(0); 5];
        harness.commit_batch(&adds).unwrap();
        harness.verify();
        assert_eq!(harness.model().count(harness.pool[0]), 4);
        assert!(harness.model().tree);

        let ops = [
            LinkOperation::Remove(0),
            LinkOperation::Remove(0),
            LinkOperation::Add(1),
        ];
        harness.commit_batch(&ops).unwrap();
        harness.verify();
        assert_eq!(harness.model().size(), 3);
    }
}
