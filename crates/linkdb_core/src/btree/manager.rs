//! Shared B-tree manager.

use crate::btree::node::TreeEntry;
use crate::btree::pointer::CollectionPointer;
use crate::btree::tree::{self, TreeWriter};
use crate::error::{CoreError, CoreResult};
use crate::record::RecordId;
use linkdb_storage::{AtomicOperation, PageStore};
use parking_lot::{Condvar, Mutex, RwLock, RwLockWriteGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Per-tree synchronization.
///
/// `owned` is the commit-time ownership lock. `pages` is held shared by
/// durable readers and exclusively while an owner publishes its pages.
#[derive(Default)]
struct TreeLatch {
    owned: Mutex<bool>,
    released: Condvar,
    pages: RwLock<()>,
}

impl TreeLatch {
    fn lock(&self) {
        let mut owned = self.owned.lock();
        while *owned {
            self.released.wait(&mut owned);
        }
        *owned = true;
    }

    fn unlock(&self) {
        *self.owned.lock() = false;
        self.released.notify_one();
    }
}

/// Hosts many logical B-trees inside a few page files.
///
/// Trees are addressed by [`CollectionPointer`]. The manager is shared
/// through `Arc` by the engine and every transaction.
///
/// Durable reads go through [`IsolatedTree`]. Writers first take
/// [`TreeOwnership`] of every tree they touch, buffer their changes in an
/// [`AtomicOperation`] and publish it in one step.
pub struct SharedBTreeManager {
    store: Arc<dyn PageStore>,
    latches: Mutex<HashMap<CollectionPointer, Arc<TreeLatch>>>,
}

impl SharedBTreeManager {
    /// Creates a manager over a page store.
    pub fn new(store: Arc<dyn PageStore>) -> Self {
        Self {
            store,
            latches: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the underlying page store.
    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    fn latch(&self, ptr: CollectionPointer) -> Arc<TreeLatch> {
        Arc::clone(self.latches.lock().entry(ptr).or_default())
    }

    /// Creates an empty tree in the named file, adding the file if needed.
    ///
    /// The tree is durable but unreachable until a commit publishes its
    /// pointer somewhere.
    pub fn create_tree(&self, file_name: &str) -> CoreResult<CollectionPointer> {
        let file = self.store.open_or_add_file(file_name)?;
        let mut op = AtomicOperation::begin(Arc::clone(&self.store));
        let ptr = TreeWriter::create(&mut op, file)?;
        op.commit(false)?;
        debug!(pointer = %ptr, file = file_name, "created tree");
        Ok(ptr)
    }

    /// Opens a durable, journal-free read view of a tree.
    pub fn load_isolated_tree(&self, ptr: CollectionPointer) -> CoreResult<IsolatedTree<'_>> {
        let view = IsolatedTree {
            manager: self,
            ptr,
            latch: self.latch(ptr),
        };
        // Fails on pages that do not hold a node.
        view.size()?;
        Ok(view)
    }

    /// Returns the durable entry count of a tree.
    pub fn size_of(&self, ptr: CollectionPointer) -> CoreResult<u64> {
        let latch = self.latch(ptr);
        let _read = latch.pages.read();
        tree::size(&*self.store, ptr)
    }

    /// Inserts one entry and publishes it immediately.
    pub fn insert(&self, ptr: CollectionPointer, key: &[u8], rid: RecordId) -> CoreResult<bool> {
        self.apply_one(ptr, |owner, op| {
            owner.insert(op, ptr, TreeEntry::new(key.to_vec(), rid))
        })
    }

    /// Removes one entry and publishes the change immediately.
    pub fn remove(&self, ptr: CollectionPointer, key: &[u8], rid: RecordId) -> CoreResult<bool> {
        self.apply_one(ptr, |owner, op| {
            owner.remove(op, ptr, &TreeEntry::new(key.to_vec(), rid))
        })
    }

    /// Frees every page of a tree. The pointer is invalid afterwards.
    pub fn release_tree(&self, ptr: CollectionPointer) -> CoreResult<()> {
        self.apply_one(ptr, |owner, op| owner.release(op, ptr).map(|_| ()))
    }

    fn apply_one<T>(
        &self,
        ptr: CollectionPointer,
        f: impl FnOnce(&mut TreeOwnership<'_>, &mut AtomicOperation) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut owner = self.acquire([ptr]);
        let mut op = AtomicOperation::begin(Arc::clone(&self.store));
        let out = f(&mut owner, &mut op)?;
        owner.publish(op, false)?;
        Ok(out)
    }

    /// Takes the ownership lock of every given tree, in pointer order.
    ///
    /// Blocks while another owner holds any of them. Ownership ends when
    /// the returned guard is dropped.
    pub fn acquire(&self, pointers: impl IntoIterator<Item = CollectionPointer>) -> TreeOwnership<'_> {
        let mut pointers: Vec<_> = pointers.into_iter().collect();
        pointers.sort();
        pointers.dedup();
        let mut latches = Vec::with_capacity(pointers.len());
        for ptr in &pointers {
            let latch = self.latch(*ptr);
            latch.lock();
            latches.push(latch);
        }
        trace!(trees = pointers.len(), "acquired tree ownership");
        TreeOwnership {
            manager: self,
            pointers,
            latches,
            released: Vec::new(),
        }
    }
}

impl fmt::Debug for SharedBTreeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBTreeManager")
            .field("latched_trees", &self.latches.lock().len())
            .finish_non_exhaustive()
    }
}

/// A durable-only read view of one tree.
///
/// Every call sees the latest published state of the tree; pending
/// journal entries of any transaction are never visible here.
pub struct IsolatedTree<'m> {
    manager: &'m SharedBTreeManager,
    ptr: CollectionPointer,
    latch: Arc<TreeLatch>,
}

impl IsolatedTree<'_> {
    /// Returns the tree's pointer.
    #[must_use]
    pub fn pointer(&self) -> CollectionPointer {
        self.ptr
    }

    /// Returns the number of entries.
    pub fn size(&self) -> CoreResult<u64> {
        let _read = self.latch.pages.read();
        tree::size(&*self.manager.store, self.ptr)
    }

    /// Returns true if the entry is stored.
    pub fn contains(&self, key: &[u8], rid: RecordId) -> CoreResult<bool> {
        let _read = self.latch.pages.read();
        tree::contains(
            &*self.manager.store,
            self.ptr,
            &TreeEntry::new(key.to_vec(), rid),
        )
    }

    /// Returns the records stored under a key.
    pub fn find(&self, key: &[u8]) -> CoreResult<Vec<RecordId>> {
        let _read = self.latch.pages.read();
        tree::find(&*self.manager.store, self.ptr, key)
    }

    /// Returns entries with keys in `lo..=hi`.
    pub fn range(&self, lo: &[u8], hi: &[u8]) -> CoreResult<Vec<TreeEntry>> {
        let _read = self.latch.pages.read();
        tree::range(&*self.manager.store, self.ptr, lo, hi)
    }

    /// Returns every entry in order.
    pub fn entries(&self) -> CoreResult<Vec<TreeEntry>> {
        let _read = self.latch.pages.read();
        tree::scan(&*self.manager.store, self.ptr)
    }

    /// Returns the smallest entry.
    pub fn first(&self) -> CoreResult<Option<TreeEntry>> {
        let _read = self.latch.pages.read();
        tree::first(&*self.manager.store, self.ptr)
    }

    /// Returns the largest entry.
    pub fn last(&self) -> CoreResult<Option<TreeEntry>> {
        let _read = self.latch.pages.read();
        tree::last(&*self.manager.store, self.ptr)
    }
}

impl fmt::Debug for IsolatedTree<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolatedTree")
            .field("ptr", &self.ptr)
            .finish_non_exhaustive()
    }
}

/// Exclusive ownership of a set of trees for the duration of a commit.
///
/// Writes go into a caller-supplied [`AtomicOperation`] and only touch
/// trees in the owned set. Reads through the ownership see the
/// operation's own buffered writes.
pub struct TreeOwnership<'m> {
    manager: &'m SharedBTreeManager,
    pointers: Vec<CollectionPointer>,
    latches: Vec<Arc<TreeLatch>>,
    released: Vec<CollectionPointer>,
}

impl TreeOwnership<'_> {
    /// Returns the owned pointers in lock order.
    #[must_use]
    pub fn pointers(&self) -> &[CollectionPointer] {
        &self.pointers
    }

    fn check(&self, ptr: CollectionPointer) -> CoreResult<()> {
        if self.pointers.binary_search(&ptr).is_ok() && !self.released.contains(&ptr) {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "{ptr} is not owned by this commit"
            )))
        }
    }

    /// Inserts an entry. Returns false if it was already present.
    pub fn insert(
        &mut self,
        op: &mut AtomicOperation,
        ptr: CollectionPointer,
        entry: TreeEntry,
    ) -> CoreResult<bool> {
        self.check(ptr)?;
        TreeWriter::new(op, ptr).insert(entry)
    }

    /// Removes an entry. Returns false if it was absent.
    pub fn remove(
        &mut self,
        op: &mut AtomicOperation,
        ptr: CollectionPointer,
        entry: &TreeEntry,
    ) -> CoreResult<bool> {
        self.check(ptr)?;
        TreeWriter::new(op, ptr).remove(entry)
    }

    /// Returns the records under `key` as seen by `op`.
    pub fn find(
        &self,
        op: &AtomicOperation,
        ptr: CollectionPointer,
        key: &[u8],
    ) -> CoreResult<Vec<RecordId>> {
        self.check(ptr)?;
        tree::find(op, ptr, key)
    }

    /// Returns every entry as seen by `op`.
    pub fn scan(&self, op: &AtomicOperation, ptr: CollectionPointer) -> CoreResult<Vec<TreeEntry>> {
        self.check(ptr)?;
        tree::scan(op, ptr)
    }

    /// Returns the entry count as seen by `op`.
    pub fn size(&self, op: &AtomicOperation, ptr: CollectionPointer) -> CoreResult<u64> {
        self.check(ptr)?;
        tree::size(op, ptr)
    }

    /// Schedules every page of a tree to be freed when `op` commits.
    pub fn release(&mut self, op: &mut AtomicOperation, ptr: CollectionPointer) -> CoreResult<usize> {
        self.check(ptr)?;
        let pages = TreeWriter::new(op, ptr).release()?;
        self.released.push(ptr);
        Ok(pages)
    }

    /// Writes `op` to the page store while excluding durable readers of
    /// every owned tree, then gives up ownership.
    pub fn publish(self, op: AtomicOperation, sync: bool) -> CoreResult<usize> {
        let guards: Vec<RwLockWriteGuard<'_, ()>> =
            self.latches.iter().map(|latch| latch.pages.write()).collect();
        let written = op.commit(sync)?;
        drop(guards);
        if !self.released.is_empty() {
            let mut latches = self.manager.latches.lock();
            for ptr in &self.released {
                latches.remove(ptr);
                debug!(pointer = %ptr, "released tree");
            }
        }
        Ok(written)
    }
}

impl Drop for TreeOwnership<'_> {
    fn drop(&mut self) {
        for latch in &self.latches {
            latch.unlock();
        }
    }
}

impl fmt::Debug for TreeOwnership<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeOwnership")
            .field("pointers", &self.pointers)
            .finish_non_exhaustive()
    }
}
