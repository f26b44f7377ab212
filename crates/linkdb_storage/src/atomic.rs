//! All-or-nothing units of page mutation.

use crate::error::{StorageError, StorageResult};
use crate::page::{FileId, PageIndex};
use crate::store::{PageRead, PageStore};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// A buffered set of page writes, allocations and frees.
///
/// Writes are kept in memory until [`commit`](Self::commit), and reads
/// through the operation observe them. Frees are deferred to commit.
/// Allocations are taken from the store immediately so that concurrent
/// operations never receive the same page; [`rollback`](Self::rollback)
/// returns them.
///
/// Dropping an operation without committing rolls it back.
///
/// # Example
///
/// ```rust
/// use linkdb_storage::{AtomicOperation, InMemoryPageStore, PageRead, PageStore};
/// use std::sync::Arc;
///
/// let store = Arc::new(InMemoryPageStore::new());
/// let file = store.add_file("tree").unwrap();
///
/// let mut op = AtomicOperation::begin(store.clone());
/// let page = op.allocate_page(file).unwrap();
/// op.write_page(file, page, vec![1u8; store.page_size()]).unwrap();
/// op.commit(true).unwrap();
///
/// assert_eq!(store.read_page(file, page).unwrap()[0], 1);
/// ```
pub struct AtomicOperation {
    store: Arc<dyn PageStore>,
    pages: BTreeMap<(FileId, PageIndex), Vec<u8>>,
    allocated: Vec<(FileId, PageIndex)>,
    freed: BTreeSet<(FileId, PageIndex)>,
    finished: bool,
}

impl AtomicOperation {
    /// Starts an empty operation against `store`.
    #[must_use]
    pub fn begin(store: Arc<dyn PageStore>) -> Self {
        Self {
            store,
            pages: BTreeMap::new(),
            allocated: Vec::new(),
            freed: BTreeSet::new(),
            finished: false,
        }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    /// Buffers a full-page write.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` has the wrong length or the page was
    /// already freed by this operation.
    pub fn write_page(&mut self, file: FileId, page: PageIndex, data: Vec<u8>) -> StorageResult<()> {
        if data.len() != self.store.page_size() {
            return Err(StorageError::InvalidPageSize {
                expected: self.store.page_size(),
                actual: data.len(),
            });
        }
        if self.freed.contains(&(file, page)) {
            return Err(StorageError::Corrupted(format!(
                "write to {page} of {file} after it was freed"
            )));
        }
        self.pages.insert((file, page), data);
        Ok(())
    }

    /// Allocates a zero-filled page.
    ///
    /// # Errors
    ///
    /// Propagates the store's allocation error, typically
    /// [`StorageError::OutOfSpace`].
    pub fn allocate_page(&mut self, file: FileId) -> StorageResult<PageIndex> {
        let page = self.store.allocate_page(file)?;
        self.allocated.push((file, page));
        self.pages
            .insert((file, page), vec![0u8; self.store.page_size()]);
        trace!(file = %file, page = %page, "atomic operation allocated page");
        Ok(page)
    }

    /// Schedules a page to be freed on commit.
    pub fn free_page(&mut self, file: FileId, page: PageIndex) {
        self.pages.remove(&(file, page));
        self.freed.insert((file, page));
    }

    /// Returns the number of buffered page images.
    #[must_use]
    pub fn dirty_pages(&self) -> usize {
        self.pages.len()
    }

    /// Returns true if nothing has been written, allocated or freed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty() && self.allocated.is_empty() && self.freed.is_empty()
    }

    /// Writes every buffered page to the store, frees scheduled pages, and
    /// flushes the store when `sync` is set.
    ///
    /// Returns the number of pages written.
    ///
    /// # Errors
    ///
    /// Returns the first store error. Pages written before the error are not
    /// reverted; recovering from a failed publish is the store's concern.
    pub fn commit(mut self, sync: bool) -> StorageResult<usize> {
        self.finished = true;
        let pages = std::mem::take(&mut self.pages);
        let written = pages.len();
        for ((file, page), data) in &pages {
            self.store.write_page(*file, *page, data)?;
        }
        for (file, page) in std::mem::take(&mut self.freed) {
            self.store.free_page(file, page)?;
        }
        if sync {
            self.store.flush()?;
        }
        trace!(written, "atomic operation committed");
        Ok(written)
    }

    /// Discards all buffered writes and returns allocated pages.
    ///
    /// # Errors
    ///
    /// Returns the first error from freeing an allocated page.
    pub fn rollback(mut self) -> StorageResult<()> {
        self.finished = true;
        self.release_allocations()
    }

    fn release_allocations(&mut self) -> StorageResult<()> {
        self.pages.clear();
        self.freed.clear();
        let mut first_error = None;
        for (file, page) in std::mem::take(&mut self.allocated) {
            if let Err(e) = self.store.free_page(file, page) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl PageRead for AtomicOperation {
    fn page_size(&self) -> usize {
        self.store.page_size()
    }

    fn read_page(&self, file: FileId, page: PageIndex) -> StorageResult<Vec<u8>> {
        if let Some(data) = self.pages.get(&(file, page)) {
            return Ok(data.clone());
        }
        if self.freed.contains(&(file, page)) {
            return Err(StorageError::Corrupted(format!(
                "read of {page} of {file} after it was freed"
            )));
        }
        self.store.read_page(file, page)
    }
}

impl Drop for AtomicOperation {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.release_allocations();
        }
    }
}

impl fmt::Debug for AtomicOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicOperation")
            .field("dirty_pages", &self.pages.len())
            .field("allocated", &self.allocated.len())
            .field("freed", &self.freed.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryPageStore;
    use proptest::prelude::*;

    fn setup() -> (Arc<InMemoryPageStore>, FileId) {
        let store = Arc::new(InMemoryPageStore::with_page_size(256).unwrap());
        let file = store.add_file("t").unwrap();
        (store, file)
    }

    #[test]
    fn reads_see_own_writes() {
        let (store, file) = setup();
        let page = store.allocate_page(file).unwrap();
        let mut op = AtomicOperation::begin(store.clone());
        op.write_page(file, page, vec![5u8; 256]).unwrap();

        assert_eq!(op.read_page(file, page).unwrap()[0], 5);
        assert_eq!(store.read_page(file, page).unwrap()[0], 0);
    }

    #[test]
    fn commit_publishes_writes() {
        let (store, file) = setup();
        let mut op = AtomicOperation::begin(store.clone());
        let page = op.allocate_page(file).unwrap();
        op.write_page(file, page, vec![3u8; 256]).unwrap();
        assert_eq!(op.commit(false).unwrap(), 1);
        assert_eq!(store.read_page(file, page).unwrap(), vec![3u8; 256]);
    }

    #[test]
    fn rollback_returns_allocations() {
        let (store, file) = setup();
        let mut op = AtomicOperation::begin(store.clone());
        op.allocate_page(file).unwrap();
        op.allocate_page(file).unwrap();
        assert_eq!(store.live_pages(), 2);
        op.rollback().unwrap();
        assert_eq!(store.live_pages(), 0);
    }

    #[test]
    fn drop_rolls_back() {
        let (store, file) = setup();
        {
            let mut op = AtomicOperation::begin(store.clone());
            op.allocate_page(file).unwrap();
        }
        assert_eq!(store.live_pages(), 0);
    }

    #[test]
    fn frees_are_deferred_to_commit() {
        let (store, file) = setup();
        let page = store.allocate_page(file).unwrap();

        let mut op = AtomicOperation::begin(store.clone());
        op.free_page(file, page);
        assert_eq!(store.live_pages(), 1);
        assert!(op.read_page(file, page).is_err());
        assert!(op.write_page(file, page, vec![0u8; 256]).is_err());
        op.commit(false).unwrap();
        assert_eq!(store.live_pages(), 0);
    }

    #[test]
    fn rollback_keeps_freed_pages() {
        let (store, file) = setup();
        let page = store.allocate_page(file).unwrap();
        let mut op = AtomicOperation::begin(store.clone());
        op.free_page(file, page);
        op.rollback().unwrap();
        assert_eq!(store.live_pages(), 1);
    }

    #[test]
    fn wrong_size_write_rejected() {
        let (store, file) = setup();
        let mut op = AtomicOperation::begin(store);
        let page = op.allocate_page(file).unwrap();
        assert!(op.write_page(file, page, vec![0u8; 10]).is_err());
        assert!(!op.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn commit_or_rollback_is_all_or_nothing(
            writes in proptest::collection::vec((0usize..6, any::<u8>()), 1..40),
            commit in any::<bool>(),
        ) {
            let (store, file) = setup();
            let existing: Vec<PageIndex> =
                (0..3).map(|_| store.allocate_page(file).unwrap()).collect();
            let mut op = AtomicOperation::begin(store.clone());
            let fresh: Vec<PageIndex> = (0..3).map(|_| op.allocate_page(file).unwrap()).collect();
            let pages: Vec<PageIndex> = existing.iter().chain(&fresh).copied().collect();

            let mut expected = vec![0u8; pages.len()];
            for &(slot, byte) in &writes {
                op.write_page(file, pages[slot], vec![byte; 256]).unwrap();
                expected[slot] = byte;
            }
            for (slot, page) in existing.iter().enumerate() {
                prop_assert_eq!(store.read_page(file, *page).unwrap()[0], 0);
                prop_assert_eq!(op.read_page(file, *page).unwrap()[0], expected[slot]);
            }

            if commit {
                op.commit(false).unwrap();
                prop_assert_eq!(store.live_pages(), 6);
                for (slot, page) in pages.iter().enumerate() {
                    prop_assert_eq!(store.read_page(file, *page).unwrap(), vec![expected[slot]; 256]);
                }
            } else {
                op.rollback().unwrap();
                prop_assert_eq!(store.live_pages(), 3);
                for page in &existing {
                    prop_assert_eq!(store.read_page(file, *page).unwrap(), vec![0u8; 256]);
                }
            }
        }
    }
}
