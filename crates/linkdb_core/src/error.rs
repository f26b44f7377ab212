//! Error types for linkdb core.

use crate::record::RecordId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in linkdb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Page store error.
    #[error("storage error: {0}")]
    Storage(#[from] linkdb_storage::StorageError),

    /// A record changed between the transaction's read and its commit.
    ///
    /// The transaction has been rolled back; the caller may retry.
    #[error("concurrency conflict on record {record}")]
    ConcurrencyConflict {
        /// The record whose durable state no longer matches.
        record: RecordId,
    },

    /// The schema forbids the attempted link or index mutation.
    #[error("schema violation: {message}")]
    SchemaViolation {
        /// Description of the violation.
        message: String,
    },

    /// A unique index would map one key to two distinct records.
    #[error("duplicate key {key:02x?} in unique index {index}: {existing} already indexed, {incoming} rejected")]
    DuplicateUniqueKey {
        /// Name of the index.
        index: String,
        /// Encoded key.
        key: Vec<u8>,
        /// Record already holding the key.
        existing: RecordId,
        /// Record that tried to take the key.
        incoming: RecordId,
    },

    /// The page store could not provide a page for a tree.
    #[error("cannot allocate tree page in {file}: {source}")]
    StorageAllocationFailure {
        /// Name of the file that needed a page.
        file: String,
        /// The underlying store error.
        #[source]
        source: linkdb_storage::StorageError,
    },

    /// The journal or merged view reached a state that correct callers can
    /// never produce.
    #[error("consistency violation: {message}")]
    ConsistencyViolation {
        /// Description of the impossible state.
        message: String,
    },

    /// Transaction was aborted.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },

    /// Index key exceeds what a tree page can hold.
    #[error("key of {len} bytes exceeds the maximum of {max}")]
    KeyTooLarge {
        /// Length of the rejected key.
        len: usize,
        /// Maximum key length for the page size.
        max: usize,
    },

    /// Record not found.
    #[error("record not found: {record}")]
    RecordNotFound {
        /// The missing record.
        record: RecordId,
    },

    /// Link collection not found.
    #[error("link collection not found: {id}")]
    CollectionNotFound {
        /// Raw id of the collection.
        id: u64,
    },

    /// Index not found.
    #[error("index not found: {name}")]
    IndexNotFound {
        /// Name or id of the index.
        name: String,
    },

    /// Encoded bytes do not decode to the expected type.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format error.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a schema violation error.
    pub fn schema_violation(message: impl Into<String>) -> Self {
        Self::SchemaViolation {
            message: message.into(),
        }
    }

    /// Creates a consistency violation error.
    pub fn consistency_violation(message: impl Into<String>) -> Self {
        Self::ConsistencyViolation {
            message: message.into(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a concurrency conflict error.
    pub fn conflict(record: RecordId) -> Self {
        Self::ConcurrencyConflict { record }
    }

    /// Returns true for errors after which retrying the transaction may
    /// succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}
