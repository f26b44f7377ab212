//! Page and file identifiers.

use std::fmt;

/// Default size of a page in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page size a store accepts.
pub const MIN_PAGE_SIZE: usize = 256;

/// Identifier of a named file inside a page store.
///
/// File ids are assigned when a file is added and are never reused, so a
/// persisted reference to a file stays unambiguous after the file is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u32);

impl FileId {
    /// Creates a file id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file:{}", self.0)
    }
}

/// Index of a page within one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageIndex(pub u64);

impl PageIndex {
    /// Sentinel used on disk for "no page".
    pub const NONE: PageIndex = PageIndex(u64::MAX);

    /// Creates a page index.
    #[must_use]
    pub const fn new(index: u64) -> Self {
        Self(index)
    }

    /// Returns the raw index value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true if this is the [`PageIndex::NONE`] sentinel.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }
}

impl fmt::Display for PageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_display() {
        assert_eq!(FileId::new(3).to_string(), "file:3");
    }

    #[test]
    fn page_index_sentinel() {
        assert!(PageIndex::NONE.is_none());
        assert!(!PageIndex::new(0).is_none());
        assert!(PageIndex::new(1) < PageIndex::new(2));
    }
}
