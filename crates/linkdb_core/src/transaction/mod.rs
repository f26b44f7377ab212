//! Transactions over link collections and indexes.
//!
//! A transaction journals every link and index mutation and merges the
//! journal into its reads. Commit replays the journal into the shared
//! trees and inline arrays under optimistic version checks; rollback
//! discards it and releases the trees the transaction created.

mod commit;
mod hooks;
mod indexes;
mod links;
mod manager;
mod state;

pub use hooks::CommitHook;
pub use state::{Transaction, TransactionState};

pub(crate) use manager::TransactionManager;
