//! Commit hooks.

use crate::error::CoreResult;
use crate::journal::JournalEntry;
use crate::transaction::Transaction;

/// Code run at commit over the transaction's pending entries.
///
/// Hooks run in passes before anything is applied. The first pass sees
/// every pending entry; each later pass sees only the entries recorded
/// since the previous one, including those recorded by hooks. Commit goes
/// ahead once a pass records nothing new, and aborts with
/// [`TransactionAborted`](crate::CoreError::TransactionAborted) if that
/// takes more than [`Config::max_hook_passes`](crate::Config::max_hook_passes)
/// passes.
pub trait CommitHook: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "commit-hook"
    }

    /// Inspects new entries and may record further ones through `tx`.
    ///
    /// Returning an error aborts the commit.
    fn on_commit(&self, tx: &mut Transaction, entries: &[JournalEntry]) -> CoreResult<()>;
}
