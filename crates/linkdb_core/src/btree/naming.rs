//! File naming for tree files.
//!
//! Trees of link collections owned by records of one segment share the file
//! `linkbag_<segment>.lbt`. Each secondary index has its own file
//! `index_<name>.ibt`.

use crate::error::{CoreError, CoreResult};
use crate::types::SegmentId;

/// Prefix of link collection tree files.
pub const LINK_FILE_PREFIX: &str = "linkbag_";
/// Extension of link collection tree files.
pub const LINK_FILE_EXTENSION: &str = ".lbt";
/// Prefix of index tree files.
pub const INDEX_FILE_PREFIX: &str = "index_";
/// Extension of index tree files.
pub const INDEX_FILE_EXTENSION: &str = ".ibt";

/// Returns the file name for link collection trees of `segment`.
#[must_use]
pub fn link_file_name(segment: SegmentId) -> String {
    format!("{LINK_FILE_PREFIX}{}{LINK_FILE_EXTENSION}", segment.as_u32())
}

/// Returns the file name for the tree of index `name`.
#[must_use]
pub fn index_file_name(name: &str) -> String {
    format!("{INDEX_FILE_PREFIX}{name}{INDEX_FILE_EXTENSION}")
}

/// Checks that an index name can be embedded in a file name.
pub(crate) fn validate_index_name(name: &str) -> CoreResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CoreError::invalid_operation(format!(
            "invalid index name: {name:?}"
        )))
    }
}
