//! Transaction bookkeeping.

use crate::types::{SequenceNumber, TransactionId};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out transaction ids and commit sequence numbers and serializes
/// the final publish step of commits.
///
/// Commits run concurrently up to the point where they publish record
/// table changes; that step holds the commit latch. Every active
/// transaction is tracked with the sequence number its reads are pinned to.
#[derive(Debug)]
pub(crate) struct TransactionManager {
    next_txid: AtomicU64,
    next_seq: AtomicU64,
    committed_seq: AtomicU64,
    commit_latch: Mutex<()>,
    active_txns: RwLock<Vec<(TransactionId, SequenceNumber)>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self {
            next_txid: AtomicU64::new(1),
            next_seq: AtomicU64::new(1),
            committed_seq: AtomicU64::new(0),
            commit_latch: Mutex::new(()),
            active_txns: RwLock::new(Vec::new()),
        }
    }
}

impl TransactionManager {
    /// Registers a transaction pinned to the latest commit. Call with the
    /// history gate held so no commit publishes in between.
    pub fn begin(&self) -> (TransactionId, SequenceNumber) {
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        let snapshot = self.committed_seq();
        self.active_txns.write().push((txid, snapshot));
        (txid, snapshot)
    }

    pub fn finish(&self, txid: TransactionId) {
        self.active_txns.write().retain(|&(id, _)| id != txid);
    }

    /// Snapshot of the oldest active transaction, or the latest commit if
    /// none is active.
    pub fn oldest_snapshot(&self) -> SequenceNumber {
        self.active_txns
            .read()
            .iter()
            .map(|&(_, snapshot)| snapshot)
            .min()
            .unwrap_or_else(|| self.committed_seq())
    }

    pub fn commit_latch(&self) -> MutexGuard<'_, ()> {
        self.commit_latch.lock()
    }

    /// Takes the next commit sequence number. Call with the commit latch
    /// held so sequence order matches publish order.
    pub fn next_sequence(&self) -> SequenceNumber {
        let seq = SequenceNumber::new(self.next_seq.fetch_add(1, Ordering::SeqCst));
        self.committed_seq.store(seq.as_u64(), Ordering::SeqCst);
        seq
    }

    pub fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed_seq.load(Ordering::SeqCst))
    }

    pub fn active_count(&self) -> usize {
        self.active_txns.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_tracked() {
        let tm = TransactionManager::default();
        let (a, _) = tm.begin();
        let (b, _) = tm.begin();
        assert_ne!(a, b);
        assert_eq!(tm.active_count(), 2);
        tm.finish(a);
        assert_eq!(tm.active_count(), 1);
    }

    #[test]
    fn oldest_snapshot_follows_active_transactions() {
        let tm = TransactionManager::default();
        let (old, pinned) = tm.begin();
        assert_eq!(pinned, SequenceNumber::new(0));
        let seq = {
            let _latch = tm.commit_latch();
            tm.next_sequence()
        };
        let (new, pinned) = tm.begin();
        assert_eq!(pinned, seq);
        assert_eq!(tm.oldest_snapshot(), SequenceNumber::new(0));
        tm.finish(old);
        assert_eq!(tm.oldest_snapshot(), seq);
        tm.finish(new);
        assert_eq!(tm.oldest_snapshot(), seq);
    }

    #[test]
    fn sequence_advances() {
        let tm = TransactionManager::default();
        assert_eq!(tm.committed_seq(), SequenceNumber::new(0));
        let seq = {
            let _latch = tm.commit_latch();
            tm.next_sequence()
        };
        assert_eq!(seq, SequenceNumber::new(1));
        assert_eq!(tm.committed_seq(), seq);
    }
}
