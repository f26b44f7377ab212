//! # linkdb Storage
//!
//! Fixed-size page storage for linkdb.
//!
//! This crate provides the lowest-level storage abstraction: named files of
//! fixed-size pages. Page stores do not interpret page contents; the B-tree
//! layer in `linkdb_core` owns the page format.
//!
//! ## Design Principles
//!
//! - Stores hand out, read, write, free and flush whole pages
//! - Structural changes are grouped into an [`AtomicOperation`] that is
//!   published or discarded as a unit
//! - Stores must be `Send + Sync` and are shared through `Arc`
//!
//! ## Available Stores
//!
//! - [`InMemoryPageStore`] - For testing and ephemeral engines
//! - [`FilePageStore`] - One OS file per named file in a locked directory
//!
//! ## Example
//!
//! ```rust
//! use linkdb_storage::{InMemoryPageStore, PageRead, PageStore};
//!
//! let store = InMemoryPageStore::new();
//! let file = store.add_file("linkbag_1.lbt").unwrap();
//! let page = store.allocate_page(file).unwrap();
//! assert_eq!(store.read_page(file, page).unwrap().len(), store.page_size());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod atomic;
mod error;
mod file;
mod memory;
mod page;
mod store;

pub use atomic::AtomicOperation;
pub use error::{StorageError, StorageResult};
pub use file::FilePageStore;
pub use memory::InMemoryPageStore;
pub use page::{FileId, PageIndex, DEFAULT_PAGE_SIZE, MIN_PAGE_SIZE};
pub use store::{PageRead, PageStore};
