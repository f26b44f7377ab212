//! Shared B-tree storage.
//!
//! Many logical B+trees (one per large link collection, one per index) live
//! inside a handful of page files. A tree is addressed by a
//! [`CollectionPointer`] whose root page never moves.

mod manager;
mod naming;
mod node;
mod pointer;
mod tree;

pub use manager::{IsolatedTree, SharedBTreeManager, TreeOwnership};
pub use naming::{
    index_file_name, link_file_name, INDEX_FILE_EXTENSION, INDEX_FILE_PREFIX,
    LINK_FILE_EXTENSION, LINK_FILE_PREFIX,
};
pub use node::TreeEntry;
pub use pointer::CollectionPointer;

pub(crate) use naming::validate_index_name;
pub(crate) use node::max_key_len;
