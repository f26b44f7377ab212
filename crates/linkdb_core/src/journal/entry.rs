//! Journal entry types.

use crate::record::RecordId;
use crate::types::{CollectionId, IndexId};
use std::fmt;

/// Kind of a pending mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JournalOp {
    /// Associate a record with a key.
    Put,
    /// Dissociate a record from a key.
    Remove,
}

/// The logical collection a journal entry targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogicalId {
    /// An adaptive link collection. Keys are encoded member record ids.
    Links(CollectionId),
    /// A secondary index. Keys are encoded index keys.
    Index(IndexId),
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Links(id) => id.fmt(f),
            Self::Index(id) => id.fmt(f),
        }
    }
}

/// How keys relate to records in a logical collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyPolicy {
    /// A record may sit under any number of keys (link collections,
    /// multi-valued indexes).
    #[default]
    MultiKey,
    /// A record sits under at most one key (single-valued property
    /// indexes). A second pending entry of the same kind for the record
    /// under a new key moves the entry instead of adding one.
    SingleKeyPerRecord,
}

/// What [`MutationJournal::record`](super::MutationJournal::record) did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The entry was added.
    Appended,
    /// An entry of the same kind for the same triple was replaced.
    Replaced,
    /// A REMOVE cancelled a pending PUT; neither remains.
    Cancelled,
    /// The record's same-kind entry moved from another key.
    Relocated,
}

/// One pending mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Target collection or index.
    pub logical: LogicalId,
    /// Encoded key.
    pub key: Vec<u8>,
    /// Referenced record.
    pub rid: RecordId,
    /// Operation.
    pub op: JournalOp,
    /// Position in the transaction's program order.
    pub seq: u64,
}

/// Pending changes for one key, as consumed by commit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyChanges {
    /// Encoded key.
    pub key: Vec<u8>,
    /// Records to associate with the key.
    pub puts: Vec<RecordId>,
    /// Records to dissociate from the key. Applied before `puts`.
    pub removes: Vec<RecordId>,
}
