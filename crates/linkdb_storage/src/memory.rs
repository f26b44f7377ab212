//! In-memory page store for testing.

use crate::error::{StorageError, StorageResult};
use crate::page::{FileId, PageIndex, DEFAULT_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::store::{PageRead, PageStore};
use parking_lot::RwLock;
use std::collections::HashMap;

/// A page store that keeps every page in memory.
///
/// Suitable for unit tests, integration tests and ephemeral engines. An
/// optional page limit makes allocation fail once that many pages are live,
/// which is how tests exercise allocation failure.
///
/// # Example
///
/// ```rust
/// use linkdb_storage::{InMemoryPageStore, PageRead, PageStore};
///
/// let store = InMemoryPageStore::new();
/// let file = store.add_file("data").unwrap();
/// let page = store.allocate_page(file).unwrap();
/// let mut buf = vec![0u8; store.page_size()];
/// buf[0] = 7;
/// store.write_page(file, page, &buf).unwrap();
/// assert_eq!(store.read_page(file, page).unwrap()[0], 7);
/// ```
#[derive(Debug)]
pub struct InMemoryPageStore {
    page_size: usize,
    page_limit: Option<u64>,
    inner: RwLock<MemoryFiles>,
}

#[derive(Debug, Default)]
struct MemoryFiles {
    next_id: u32,
    live_pages: u64,
    names: HashMap<String, FileId>,
    files: HashMap<FileId, MemoryFile>,
}

#[derive(Debug)]
struct MemoryFile {
    name: String,
    pages: Vec<Vec<u8>>,
    free: Vec<PageIndex>,
}

impl Default for InMemoryPageStore {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_limit: None,
            inner: RwLock::new(MemoryFiles::default()),
        }
    }
}

impl InMemoryPageStore {
    /// Creates an empty store with the default page size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store with a custom page size.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidPageSize`] if `page_size` is below
    /// [`MIN_PAGE_SIZE`].
    pub fn with_page_size(page_size: usize) -> StorageResult<Self> {
        if page_size < MIN_PAGE_SIZE {
            return Err(StorageError::InvalidPageSize {
                expected: MIN_PAGE_SIZE,
                actual: page_size,
            });
        }
        Ok(Self {
            page_size,
            ..Self::default()
        })
    }

    /// Limits the number of live pages across all files.
    #[must_use]
    pub fn with_page_limit(mut self, limit: u64) -> Self {
        self.page_limit = Some(limit);
        self
    }

    /// Returns the number of allocated pages not on a free list.
    #[must_use]
    pub fn live_pages(&self) -> u64 {
        self.inner.read().live_pages
    }

    /// Returns the names of all registered files.
    #[must_use]
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().names.keys().cloned().collect();
        names.sort();
        names
    }

    fn check_len(&self, data: &[u8]) -> StorageResult<()> {
        if data.len() != self.page_size {
            return Err(StorageError::InvalidPageSize {
                expected: self.page_size,
                actual: data.len(),
            });
        }
        Ok(())
    }
}

impl MemoryFile {
    fn check(&self, file: FileId, page: PageIndex) -> StorageResult<usize> {
        let count = self.pages.len() as u64;
        if page.as_u64() >= count {
            return Err(StorageError::PageOutOfRange { file, page, count });
        }
        Ok(page.as_u64() as usize)
    }
}

impl PageRead for InMemoryPageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self, file: FileId, page: PageIndex) -> StorageResult<Vec<u8>> {
        let inner = self.inner.read();
        let f = inner
            .files
            .get(&file)
            .ok_or(StorageError::UnknownFile(file))?;
        let slot = f.check(file, page)?;
        Ok(f.pages[slot].clone())
    }
}

impl PageStore for InMemoryPageStore {
    fn add_file(&self, name: &str) -> StorageResult<FileId> {
        let mut inner = self.inner.write();
        if inner.names.contains_key(name) {
            return Err(StorageError::FileExists(name.to_string()));
        }
        let id = FileId::new(inner.next_id);
        inner.next_id += 1;
        inner.names.insert(name.to_string(), id);
        inner.files.insert(
            id,
            MemoryFile {
                name: name.to_string(),
                pages: Vec::new(),
                free: Vec::new(),
            },
        );
        Ok(id)
    }

    fn file_id(&self, name: &str) -> Option<FileId> {
        self.inner.read().names.get(name).copied()
    }

    fn file_name(&self, file: FileId) -> StorageResult<String> {
        self.inner
            .read()
            .files
            .get(&file)
            .map(|f| f.name.clone())
            .ok_or(StorageError::UnknownFile(file))
    }

    fn delete_file(&self, file: FileId) -> StorageResult<()> {
        let mut inner = self.inner.write();
        let removed = inner
            .files
            .remove(&file)
            .ok_or(StorageError::UnknownFile(file))?;
        inner.names.remove(&removed.name);
        let live = removed.pages.len() as u64 - removed.free.len() as u64;
        inner.live_pages -= live;
        Ok(())
    }

    fn page_count(&self, file: FileId) -> StorageResult<u64> {
        self.inner
            .read()
            .files
            .get(&file)
            .map(|f| f.pages.len() as u64)
            .ok_or(StorageError::UnknownFile(file))
    }

    fn allocate_page(&self, file: FileId) -> StorageResult<PageIndex> {
        let page_size = self.page_size;
        let mut inner = self.inner.write();
        if let Some(limit) = self.page_limit {
            if inner.live_pages >= limit {
                return Err(StorageError::OutOfSpace { file, limit });
            }
        }
        let f = inner
            .files
            .get_mut(&file)
            .ok_or(StorageError::UnknownFile(file))?;
        let page = match f.free.pop() {
            Some(page) => {
                f.pages[page.as_u64() as usize] = vec![0u8; page_size];
                page
            }
            None => {
                f.pages.push(vec![0u8; page_size]);
                PageIndex::new(f.pages.len() as u64 - 1)
            }
        };
        inner.live_pages += 1;
        Ok(page)
    }

    fn free_page(&self, file: FileId, page: PageIndex) -> StorageResult<()> {
        let mut inner = self.inner.write();
        let f = inner
            .files
            .get_mut(&file)
            .ok_or(StorageError::UnknownFile(file))?;
        let slot = f.check(file, page)?;
        if f.free.contains(&page) {
            return Err(StorageError::Corrupted(format!(
                "{page} of {file} freed twice"
            )));
        }
        f.pages[slot].fill(0);
        f.free.push(page);
        inner.live_pages -= 1;
        Ok(())
    }

    fn write_page(&self, file: FileId, page: PageIndex, data: &[u8]) -> StorageResult<()> {
        self.check_len(data)?;
        let mut inner = self.inner.write();
        let f = inner
            .files
            .get_mut(&file)
            .ok_or(StorageError::UnknownFile(file))?;
        let slot = f.check(file, page)?;
        f.pages[slot].copy_from_slice(data);
        Ok(())
    }

    fn flush(&self) -> StorageResult<()> {
        // Nothing is buffered
        Ok(())
    }
}
