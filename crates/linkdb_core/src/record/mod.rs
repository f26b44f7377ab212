//! Record identities and committed record metadata.

mod id;
mod table;

pub use id::RecordId;
pub use table::RecordMeta;
pub(crate) use table::{RecordBatch, RecordTable};
