//! # linkdb Core
//!
//! Core engine for linkdb.
//!
//! This crate provides:
//! - Record identities and a minimal segment schema
//! - The per-transaction mutation journal with operation coalescing
//! - Adaptive link collections that move between inline and tree storage
//! - A shared B-tree manager hosting many trees in a few page files
//! - Secondary indexes, unique or not
//! - Snapshot reads with commit and rollback under optimistic concurrency
//!   control
//!
//! ## Example
//!
//! ```rust
//! use linkdb_core::{ConversionPolicy, Engine};
//!
//! let engine = Engine::open_in_memory().unwrap();
//! let people = engine.create_segment("Person", false).unwrap();
//!
//! let mut tx = engine.begin().unwrap();
//! let owner = tx.create_record(people).unwrap();
//! let friends = tx
//!     .create_link_collection_with(owner, ConversionPolicy::new(2, -1).unwrap())
//!     .unwrap();
//! for _ in 0..3 {
//!     let friend = tx.create_record(people).unwrap();
//!     tx.links(friends).unwrap().add(friend).unwrap();
//! }
//! assert!(!tx.links(friends).unwrap().is_embedded().unwrap());
//! engine.commit(&mut tx).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod btree;
mod collection;
mod config;
mod engine;
mod error;
mod index;
mod journal;
mod record;
mod schema;
mod snapshot;
mod stats;
mod transaction;
mod types;

pub use btree::{
    index_file_name, link_file_name, CollectionPointer, IsolatedTree, SharedBTreeManager,
    TreeEntry, TreeOwnership, INDEX_FILE_EXTENSION, INDEX_FILE_PREFIX, LINK_FILE_EXTENSION,
    LINK_FILE_PREFIX,
};
pub use collection::{
    ConversionPolicy, LinkCollection, LinkEntry, LinkIter, LinkOptions, Representation, Threshold,
};
pub use config::Config;
pub use engine::Engine;
pub use error::{CoreError, CoreResult};
pub use index::{CompositeKey2, CompositeKey3, IndexDefinition, IndexKey};
pub use journal::{
    JournalEntry, JournalOp, KeyChanges, KeyPolicy, LogicalId, MutationJournal, RecordOutcome,
};
pub use record::{RecordId, RecordMeta};
pub use schema::SegmentDef;
pub use stats::{EngineStats, StatsSnapshot};
pub use transaction::{CommitHook, Transaction, TransactionState};
pub use types::{CollectionId, IndexId, SegmentId, SequenceNumber, TransactionId};
