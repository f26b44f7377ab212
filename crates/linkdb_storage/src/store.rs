//! Page store trait definitions.

use crate::error::StorageResult;
use crate::page::{FileId, PageIndex};

/// Read access to fixed-size pages.
///
/// Implemented by every [`PageStore`] and by
/// [`AtomicOperation`](crate::AtomicOperation), whose reads observe its own
/// buffered writes. Code that only reads pages should be generic over this
/// trait so it works both against durable state and inside an atomic
/// operation.
pub trait PageRead {
    /// Returns the size of every page in bytes.
    fn page_size(&self) -> usize;

    /// Reads a full page.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unknown, the page was never
    /// allocated, or an I/O error occurs.
    fn read_page(&self, file: FileId, page: PageIndex) -> StorageResult<Vec<u8>>;
}

/// Durable storage of fixed-size pages grouped into named files.
///
/// Page stores do not interpret page contents. The B-tree layer owns the
/// page format; the store only hands out, reads, writes and recycles pages.
///
/// # Invariants
///
/// - Every page returned by `allocate_page` is `page_size` bytes, zero-filled
/// - `read_page` returns exactly the bytes of the last `write_page`
/// - Freed pages may be handed out again by a later `allocate_page`
/// - `flush` makes all previous writes durable
/// - Stores are `Send + Sync`; all methods take `&self`
///
/// # Implementors
///
/// - [`super::InMemoryPageStore`] - For testing
/// - [`super::FilePageStore`] - One OS file per named file in a directory
pub trait PageStore: PageRead + Send + Sync {
    /// Registers a new named file and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::FileExists`](crate::StorageError::FileExists)
    /// if the name is taken, or an I/O error.
    fn add_file(&self, name: &str) -> StorageResult<FileId>;

    /// Looks up a file id by name.
    fn file_id(&self, name: &str) -> Option<FileId>;

    /// Returns the name a file was registered under.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unknown.
    fn file_name(&self, file: FileId) -> StorageResult<String>;

    /// Removes a file and all of its pages.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unknown or an I/O error occurs.
    fn delete_file(&self, file: FileId) -> StorageResult<()>;

    /// Returns the id of the named file, adding it if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be added.
    fn open_or_add_file(&self, name: &str) -> StorageResult<FileId> {
        match self.file_id(name) {
            Some(id) => Ok(id),
            None => self.add_file(name),
        }
    }

    /// Returns the number of pages ever allocated in a file, including
    /// pages currently on the free list.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unknown.
    fn page_count(&self, file: FileId) -> StorageResult<u64>;

    /// Allocates a zero-filled page, reusing a freed page when possible.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfSpace`](crate::StorageError::OutOfSpace)
    /// when the store cannot grow, or an I/O error.
    fn allocate_page(&self, file: FileId) -> StorageResult<PageIndex>;

    /// Returns a page to the file's free list.
    ///
    /// # Errors
    ///
    /// Returns an error if the page is out of range or an I/O error occurs.
    fn free_page(&self, file: FileId, page: PageIndex) -> StorageResult<()>;

    /// Overwrites a full page.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is not exactly `page_size` bytes, the page
    /// is out of range, or an I/O error occurs.
    fn write_page(&self, file: FileId, page: PageIndex, data: &[u8]) -> StorageResult<()>;

    /// Flushes all writes and file metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> StorageResult<()>;
}
