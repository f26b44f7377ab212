//! Secondary indexes.
//!
//! Each index owns one tree in `index_<name>.ibt`. Index mutations are
//! journaled like link mutations and replayed at commit; unique indexes
//! are checked there against the final state of every touched key.

mod key;

pub use key::{CompositeKey2, CompositeKey3, IndexKey};

use crate::btree::{index_file_name, validate_index_name, CollectionPointer, SharedBTreeManager};
use crate::error::{CoreError, CoreResult};
use crate::journal::KeyPolicy;
use crate::types::{IndexId, SegmentId};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Definition of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    /// Index id.
    pub id: IndexId,
    /// Unique index name.
    pub name: String,
    /// Segment whose records the index holds.
    pub segment: SegmentId,
    /// Whether a key may map to at most one record.
    pub unique: bool,
    /// How keys relate to records.
    pub key_policy: KeyPolicy,
    /// The index tree.
    pub pointer: CollectionPointer,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: u32,
    definitions: HashMap<IndexId, IndexDefinition>,
    by_name: HashMap<String, IndexId>,
}

/// Registry of index definitions.
#[derive(Debug, Default)]
pub(crate) struct IndexRegistry {
    inner: RwLock<RegistryInner>,
}

impl IndexRegistry {
    /// Creates an index and its tree.
    pub fn create(
        &self,
        trees: &SharedBTreeManager,
        name: &str,
        segment: SegmentId,
        unique: bool,
        key_policy: KeyPolicy,
    ) -> CoreResult<IndexId> {
        validate_index_name(name)?;
        // Held across tree creation so two creators cannot share a name.
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(name) {
            return Err(CoreError::invalid_operation(format!(
                "index already exists: {name}"
            )));
        }
        let pointer = trees.create_tree(&index_file_name(name))?;
        inner.next_id += 1;
        let id = IndexId::new(inner.next_id);
        inner.by_name.insert(name.to_string(), id);
        inner.definitions.insert(
            id,
            IndexDefinition {
                id,
                name: name.to_string(),
                segment,
                unique,
                key_policy,
                pointer,
            },
        );
        debug!(index = %id, name, unique, pointer = %pointer, "created index");
        Ok(id)
    }

    pub fn get(&self, id: IndexId) -> CoreResult<IndexDefinition> {
        self.inner
            .read()
            .definitions
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::IndexNotFound {
                name: id.to_string(),
            })
    }

    pub fn by_name(&self, name: &str) -> Option<IndexDefinition> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .and_then(|id| inner.definitions.get(id))
            .cloned()
    }

    /// Indexes over the records of `segment`, in id order.
    pub fn for_segment(&self, segment: SegmentId) -> Vec<IndexDefinition> {
        let mut defs: Vec<IndexDefinition> = self
            .inner
            .read()
            .definitions
            .values()
            .filter(|def| def.segment == segment)
            .cloned()
            .collect();
        defs.sort_by_key(|def| def.id);
        defs
    }
}
