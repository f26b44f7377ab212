//! Collection pointers.

use linkdb_storage::{FileId, PageIndex};
use std::fmt;

/// Address of one logical tree inside the shared page files.
///
/// The root page of a tree never moves, so a pointer stays valid for the
/// whole life of its tree, including across restarts of a file-backed store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionPointer {
    file: FileId,
    root: PageIndex,
}

impl CollectionPointer {
    /// Creates a pointer.
    #[must_use]
    pub const fn new(file: FileId, root: PageIndex) -> Self {
        Self { file, root }
    }

    /// Returns the file holding the tree.
    #[must_use]
    pub const fn file(&self) -> FileId {
        self.file
    }

    /// Returns the root page of the tree.
    #[must_use]
    pub const fn root(&self) -> PageIndex {
        self.root
    }
}

impl fmt::Display for CollectionPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tree({}/{})", self.file, self.root)
    }
}
