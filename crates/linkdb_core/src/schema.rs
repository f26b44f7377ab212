//! Minimal segment schema.
//!
//! Segments are the record containers named by [`RecordId`](crate::RecordId).
//! The schema only knows what the link and index layers need to reject
//! mutations early: whether a segment exists and whether it is abstract.

use crate::error::{CoreError, CoreResult};
use crate::types::SegmentId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Definition of a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDef {
    /// Segment id.
    pub id: SegmentId,
    /// Unique segment name.
    pub name: String,
    /// Abstract segments cannot hold records.
    pub is_abstract: bool,
}

#[derive(Debug)]
struct SegmentSlot {
    def: SegmentDef,
    next_position: AtomicU64,
}

#[derive(Debug)]
struct SchemaInner {
    next_id: u32,
    segments: HashMap<SegmentId, SegmentSlot>,
    by_name: HashMap<String, SegmentId>,
}

/// Registry of segments.
#[derive(Debug)]
pub(crate) struct Schema {
    inner: RwLock<SchemaInner>,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            inner: RwLock::new(SchemaInner {
                next_id: 1,
                segments: HashMap::new(),
                by_name: HashMap::new(),
            }),
        }
    }
}

impl Schema {
    pub fn create_segment(&self, name: &str, is_abstract: bool) -> CoreResult<SegmentId> {
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(name) {
            return Err(CoreError::invalid_operation(format!(
                "segment already exists: {name}"
            )));
        }
        let id = SegmentId::new(inner.next_id);
        inner.next_id += 1;
        inner.by_name.insert(name.to_string(), id);
        inner.segments.insert(
            id,
            SegmentSlot {
                def: SegmentDef {
                    id,
                    name: name.to_string(),
                    is_abstract,
                },
                next_position: AtomicU64::new(0),
            },
        );
        Ok(id)
    }

    pub fn segment(&self, id: SegmentId) -> CoreResult<SegmentDef> {
        self.inner
            .read()
            .segments
            .get(&id)
            .map(|slot| slot.def.clone())
            .ok_or_else(|| CoreError::schema_violation(format!("unknown segment {id}")))
    }

    pub fn segment_by_name(&self, name: &str) -> Option<SegmentDef> {
        let inner = self.inner.read();
        let id = inner.by_name.get(name)?;
        inner.segments.get(id).map(|slot| slot.def.clone())
    }

    /// Allocates the next record position in a concrete segment.
    ///
    /// Positions are never handed out twice, even when the creating
    /// transaction rolls back.
    pub fn allocate_position(&self, id: SegmentId) -> CoreResult<u64> {
        let inner = self.inner.read();
        let slot = inner
            .segments
            .get(&id)
            .ok_or_else(|| CoreError::schema_violation(format!("unknown segment {id}")))?;
        if slot.def.is_abstract {
            return Err(CoreError::schema_violation(format!(
                "cannot create a record in abstract segment {}",
                slot.def.name
            )));
        }
        Ok(slot.next_position.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_lookup() {
        let schema = Schema::default();
        let id = schema.create_segment("Person", false).unwrap();
        assert_eq!(schema.segment(id).unwrap().name, "Person");
        assert_eq!(schema.segment_by_name("Person").unwrap().id, id);
    }

    #[test]
    fn duplicate_name_rejected() {
        let schema = Schema::default();
        schema.create_segment("Person", false).unwrap();
        assert!(schema.create_segment("Person", true).is_err());
    }

    #[test]
    fn positions_increase() {
        let schema = Schema::default();
        let id = schema.create_segment("Person", false).unwrap();
        assert_eq!(schema.allocate_position(id).unwrap(), 0);
        assert_eq!(schema.allocate_position(id).unwrap(), 1);
    }

    #[test]
    fn abstract_segment_cannot_hold_records() {
        let schema = Schema::default();
        let id = schema.create_segment("Shape", true).unwrap();
        assert!(matches!(
            schema.allocate_position(id),
            Err(CoreError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn unknown_segment_is_schema_violation() {
        let schema = Schema::default();
        assert!(matches!(
            schema.segment(SegmentId::new(99)),
            Err(CoreError::SchemaViolation { .. })
        ));
    }
}
