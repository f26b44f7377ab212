//! Index operations of a transaction.

use crate::btree::max_key_len;
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexDefinition, IndexKey};
use crate::journal::{JournalOp, LogicalId, RecordOutcome};
use crate::record::RecordId;
use crate::transaction::Transaction;
use crate::types::IndexId;
use std::collections::BTreeSet;

impl Transaction {
    /// Associates `rid` with `key` in an index.
    ///
    /// # Errors
    ///
    /// - [`CoreError::SchemaViolation`] if `rid` is not a live record of the
    ///   index's segment
    /// - [`CoreError::KeyTooLarge`] if the encoded key cannot fit a tree page
    ///
    /// Unique violations are detected at commit.
    pub fn index_put<K: IndexKey>(
        &mut self,
        index: IndexId,
        key: &K,
        rid: RecordId,
    ) -> CoreResult<RecordOutcome> {
        self.index_record(index, key.to_bytes(), rid, JournalOp::Put)
    }

    /// Dissociates `rid` from `key` in an index.
    ///
    /// # Errors
    ///
    /// [`CoreError::ConsistencyViolation`] if `rid` is not stored under
    /// `key` as seen by this transaction.
    pub fn index_remove<K: IndexKey>(
        &mut self,
        index: IndexId,
        key: &K,
        rid: RecordId,
    ) -> CoreResult<RecordOutcome> {
        self.index_record(index, key.to_bytes(), rid, JournalOp::Remove)
    }

    /// Returns the records under `key`, including pending changes.
    pub fn index_get<K: IndexKey>(&self, index: IndexId, key: &K) -> CoreResult<Vec<RecordId>> {
        self.index_lookup(index, &key.to_bytes())
    }

    /// Removes every entry of an index. Entries put afterwards in the same
    /// transaction are kept.
    pub fn clear_index(&mut self, index: IndexId) -> CoreResult<()> {
        self.ensure_active()?;
        let def = self.shared.indexes.get(index)?;
        let logical = LogicalId::Index(index);
        self.journal.set_key_policy(logical, def.key_policy);
        self.journal.clear(logical);
        Ok(())
    }

    pub(super) fn index_record(
        &mut self,
        index: IndexId,
        key: Vec<u8>,
        rid: RecordId,
        op: JournalOp,
    ) -> CoreResult<RecordOutcome> {
        self.ensure_active()?;
        let def = self.shared.indexes.get(index)?;
        self.check_indexable(&def, rid)?;
        let max = max_key_len(self.shared.trees.store().page_size());
        if key.len() > max {
            return Err(CoreError::KeyTooLarge {
                len: key.len(),
                max,
            });
        }
        if op == JournalOp::Remove && !self.index_lookup(index, &key)?.contains(&rid) {
            return Err(CoreError::consistency_violation(format!(
                "{rid} is not stored under {key:?} in {}",
                def.name
            )));
        }
        self.observe(rid);
        let logical = LogicalId::Index(index);
        self.journal.set_key_policy(logical, def.key_policy);
        Ok(self.journal.record(logical, &key, rid, op))
    }

    /// Keys `rid` is stored under in an index, as seen by this transaction.
    pub(super) fn index_keys_of(
        &self,
        def: &IndexDefinition,
        rid: RecordId,
    ) -> CoreResult<BTreeSet<Vec<u8>>> {
        let logical = LogicalId::Index(def.id);
        let mut keys: BTreeSet<Vec<u8>> = if self.journal.is_cleared(logical) {
            BTreeSet::new()
        } else {
            self.snapshot()
                .tree_scan(def.pointer)?
                .into_iter()
                .filter(|e| e.rid == rid)
                .map(|e| e.key)
                .collect()
        };
        for entry in self.journal.entries_in_order(logical) {
            if entry.rid != rid {
                continue;
            }
            match entry.op {
                JournalOp::Put => keys.insert(entry.key),
                JournalOp::Remove => keys.remove(&entry.key),
            };
        }
        Ok(keys)
    }

    fn check_indexable(&self, def: &IndexDefinition, rid: RecordId) -> CoreResult<()> {
        if rid.segment() != def.segment {
            return Err(CoreError::schema_violation(format!(
                "index {} covers {}, not {}",
                def.name,
                def.segment,
                rid.segment()
            )));
        }
        if !self.record_exists(rid) {
            return Err(CoreError::schema_violation(format!(
                "cannot index missing record {rid} in {}",
                def.name
            )));
        }
        Ok(())
    }

    pub(super) fn index_lookup(&self, index: IndexId, key: &[u8]) -> CoreResult<Vec<RecordId>> {
        let def = self.shared.indexes.get(index)?;
        let logical = LogicalId::Index(index);
        let durable: Vec<RecordId> = if self.journal.is_cleared(logical) {
            Vec::new()
        } else {
            self.snapshot()
                .tree_range(def.pointer, key, key)?
                .into_iter()
                .map(|e| e.rid)
                .collect()
        };
        self.journal.merged_view(logical, key, &durable)
    }
}
