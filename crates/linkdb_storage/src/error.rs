//! Error types for page store operations.

use crate::page::{FileId, PageIndex};
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during page store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A page index beyond the file's allocated range was accessed.
    #[error("page {page} out of range for {file} ({count} pages)")]
    PageOutOfRange {
        /// The file accessed.
        file: FileId,
        /// The requested page.
        page: PageIndex,
        /// Number of pages currently allocated in the file.
        count: u64,
    },

    /// The store has no room for another page.
    #[error("out of space: cannot allocate a page in {file} (limit {limit} pages)")]
    OutOfSpace {
        /// The file that needed a page.
        file: FileId,
        /// The configured page limit.
        limit: u64,
    },

    /// No file is registered under this id.
    #[error("unknown file: {0}")]
    UnknownFile(FileId),

    /// A file with this name already exists.
    #[error("file already exists: {0}")]
    FileExists(String),

    /// A page buffer did not match the store's page size.
    #[error("invalid page size: expected {expected} bytes, got {actual}")]
    InvalidPageSize {
        /// The store's page size.
        expected: usize,
        /// The size of the buffer supplied.
        actual: usize,
    },

    /// The on-disk data is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the store directory lock.
    #[error("store locked: another process has exclusive access")]
    Locked,
}
