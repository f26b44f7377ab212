//! Directory-backed page store for persistent storage.
//!
//! Layout of a store directory:
//!
//! ```text
//! <dir>/
//! ├─ LOCK          # Advisory lock for single-process access
//! ├─ FILEMAP       # File name -> file id mapping
//! └─ <name>        # One OS file per named file
//! ```
//!
//! Physical page 0 of every file holds a header with the page size, the
//! number of allocated pages and the head of the free list. Logical page
//! `n` lives at physical page `n + 1`. Freed pages are chained through their
//! first eight bytes.

use crate::error::{StorageError, StorageResult};
use crate::page::{FileId, PageIndex, DEFAULT_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::store::{PageRead, PageStore};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const LOCK_FILE: &str = "LOCK";
const FILE_MAP: &str = "FILEMAP";
const FILE_MAP_TEMP: &str = "FILEMAP.tmp";

const MAGIC: &[u8; 8] = b"LDBPAGE\0";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 8 + 2 + 4 + 8 + 8;

/// A page store that keeps each named file as an OS file in one directory.
///
/// # Durability
///
/// - `write_page` writes through to the OS file
/// - `flush` persists file headers and calls `File::sync_all()`
///
/// # Thread Safety
///
/// Each file has its own lock, so operations on different files proceed
/// in parallel.
///
/// # Example
///
/// ```no_run
/// use linkdb_storage::{FilePageStore, PageStore};
/// use std::path::Path;
///
/// let store = FilePageStore::open(Path::new("pages")).unwrap();
/// let file = store.open_or_add_file("linkbag_3.lbt").unwrap();
/// let page = store.allocate_page(file).unwrap();
/// store.flush().unwrap();
/// ```
#[derive(Debug)]
pub struct FilePageStore {
    path: PathBuf,
    page_size: usize,
    table: RwLock<FileTable>,
    _lock_file: File,
}

#[derive(Debug, Default)]
struct FileTable {
    next_id: u32,
    names: HashMap<String, FileId>,
    files: HashMap<FileId, Arc<Mutex<PageFile>>>,
}

#[derive(Debug)]
struct PageFile {
    name: String,
    file: File,
    page_count: u64,
    free_head: PageIndex,
    header_dirty: bool,
}

impl FilePageStore {
    /// Opens or creates a store in `path` with the default page size.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, another process
    /// holds the lock, or an existing file is corrupted.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with_page_size(path, DEFAULT_PAGE_SIZE)
    }

    /// Opens or creates a store with an explicit page size.
    ///
    /// Existing files must have been created with the same page size.
    ///
    /// # Errors
    ///
    /// See [`FilePageStore::open`]; also fails with
    /// [`StorageError::InvalidPageSize`] on a page size mismatch.
    pub fn open_with_page_size(path: &Path, page_size: usize) -> StorageResult<Self> {
        if page_size < MIN_PAGE_SIZE {
            return Err(StorageError::InvalidPageSize {
                expected: MIN_PAGE_SIZE,
                actual: page_size,
            });
        }
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let mut table = FileTable::default();
        let map_path = path.join(FILE_MAP);
        if map_path.exists() {
            let (next_id, entries) = read_file_map(&map_path)?;
            table.next_id = next_id;
            for (id, name) in entries {
                let page_file = PageFile::open(&path.join(&name), name.clone(), page_size)?;
                table.names.insert(name, id);
                table.files.insert(id, Arc::new(Mutex::new(page_file)));
            }
        }
        debug!(path = %path.display(), files = table.files.len(), "opened page store");

        Ok(Self {
            path: path.to_path_buf(),
            page_size,
            table: RwLock::new(table),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&self, file: FileId) -> StorageResult<Arc<Mutex<PageFile>>> {
        self.table
            .read()
            .files
            .get(&file)
            .cloned()
            .ok_or(StorageError::UnknownFile(file))
    }

    fn persist_file_map(&self, table: &FileTable) -> StorageResult<()> {
        let mut entries: Vec<(&String, &FileId)> = table.names.iter().collect();
        entries.sort_by_key(|(_, id)| **id);

        let mut out = format!("next {}\n", table.next_id);
        for (name, id) in entries {
            out.push_str(&format!("{} {}\n", id.as_u32(), name));
        }

        let temp = self.path.join(FILE_MAP_TEMP);
        {
            let mut f = File::create(&temp)?;
            f.write_all(out.as_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&temp, self.path.join(FILE_MAP))?;
        Ok(())
    }
}

fn read_file_map(path: &Path) -> StorageResult<(u32, Vec<(FileId, String)>)> {
    let text = fs::read_to_string(path)?;
    let mut lines = text.lines();
    let next_id = lines
        .next()
        .and_then(|l| l.strip_prefix("next "))
        .and_then(|n| n.parse::<u32>().ok())
        .ok_or_else(|| StorageError::Corrupted("FILEMAP header missing".into()))?;

    let mut entries = Vec::new();
    for line in lines.filter(|l| !l.is_empty()) {
        let (id, name) = line
            .split_once(' ')
            .ok_or_else(|| StorageError::Corrupted(format!("bad FILEMAP line: {line}")))?;
        let id = id
            .parse::<u32>()
            .map_err(|_| StorageError::Corrupted(format!("bad file id: {id}")))?;
        entries.push((FileId::new(id), name.to_string()));
    }
    Ok((next_id, entries))
}

fn validate_name(name: &str) -> StorageResult<()> {
    let reserved = name == LOCK_FILE || name == FILE_MAP || name == FILE_MAP_TEMP;
    if name.is_empty() || reserved || name.contains(['/', '\\', ' ', '\n']) {
        return Err(StorageError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid file name: {name:?}"),
        )));
    }
    Ok(())
}

impl PageFile {
    fn create(path: &Path, name: String, page_size: usize) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        let mut page_file = Self {
            name,
            file,
            page_count: 0,
            free_head: PageIndex::NONE,
            header_dirty: true,
        };
        page_file.write_header(page_size)?;
        Ok(page_file)
    }

    fn open(path: &Path, name: String, page_size: usize) -> StorageResult<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut header = [0u8; HEADER_LEN];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;

        if &header[0..8] != MAGIC {
            return Err(StorageError::Corrupted(format!("{name}: bad magic")));
        }
        let version = u16::from_be_bytes([header[8], header[9]]);
        if version != FORMAT_VERSION {
            return Err(StorageError::Corrupted(format!(
                "{name}: unsupported format version {version}"
            )));
        }
        let stored_size = u32::from_be_bytes(header[10..14].try_into().unwrap_or([0; 4])) as usize;
        if stored_size != page_size {
            return Err(StorageError::InvalidPageSize {
                expected: page_size,
                actual: stored_size,
            });
        }
        let page_count = read_u64(&header[14..22]);
        let free_head = PageIndex::new(read_u64(&header[22..30]));

        Ok(Self {
            name,
            file,
            page_count,
            free_head,
            header_dirty: false,
        })
    }

    fn write_header(&mut self, page_size: usize) -> StorageResult<()> {
        let mut header = vec![0u8; page_size];
        header[0..8].copy_from_slice(MAGIC);
        header[8..10].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
        header[10..14].copy_from_slice(&(page_size as u32).to_be_bytes());
        header[14..22].copy_from_slice(&self.page_count.to_be_bytes());
        header[22..30].copy_from_slice(&self.free_head.as_u64().to_be_bytes());
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header)?;
        self.header_dirty = false;
        Ok(())
    }

    fn check(&self, file: FileId, page: PageIndex) -> StorageResult<()> {
        if page.as_u64() >= self.page_count {
            return Err(StorageError::PageOutOfRange {
                file,
                page,
                count: self.page_count,
            });
        }
        Ok(())
    }

    fn offset(page: PageIndex, page_size: usize) -> u64 {
        (page.as_u64() + 1) * page_size as u64
    }

    fn read(&mut self, page: PageIndex, page_size: usize) -> StorageResult<Vec<u8>> {
        let mut buf = vec![0u8; page_size];
        self.file
            .seek(SeekFrom::Start(Self::offset(page, page_size)))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write(&mut self, page: PageIndex, data: &[u8]) -> StorageResult<()> {
        self.file
            .seek(SeekFrom::Start(Self::offset(page, data.len())))?;
        self.file.write_all(data)?;
        Ok(())
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(arr)
}

impl PageRead for FilePageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_page(&self, file: FileId, page: PageIndex) -> StorageResult<Vec<u8>> {
        let handle = self.file(file)?;
        let mut f = handle.lock();
        f.check(file, page)?;
        f.read(page, self.page_size)
    }
}

impl PageStore for FilePageStore {
    fn add_file(&self, name: &str) -> StorageResult<FileId> {
        validate_name(name)?;
        let mut table = self.table.write();
        if table.names.contains_key(name) {
            return Err(StorageError::FileExists(name.to_string()));
        }
        let page_file = PageFile::create(&self.path.join(name), name.to_string(), self.page_size)?;
        let id = FileId::new(table.next_id);
        table.next_id += 1;
        table.names.insert(name.to_string(), id);
        table.files.insert(id, Arc::new(Mutex::new(page_file)));
        self.persist_file_map(&table)?;
        debug!(file = %id, name, "added page file");
        Ok(id)
    }

    fn file_id(&self, name: &str) -> Option<FileId> {
        self.table.read().names.get(name).copied()
    }

    fn file_name(&self, file: FileId) -> StorageResult<String> {
        let handle = self.file(file)?;
        let name = handle.lock().name.clone();
        Ok(name)
    }

    fn delete_file(&self, file: FileId) -> StorageResult<()> {
        let mut table = self.table.write();
        let handle = table
            .files
            .remove(&file)
            .ok_or(StorageError::UnknownFile(file))?;
        let name = handle.lock().name.clone();
        table.names.remove(&name);
        self.persist_file_map(&table)?;
        fs::remove_file(self.path.join(&name))?;
        debug!(file = %file, name = %name, "deleted page file");
        Ok(())
    }

    fn page_count(&self, file: FileId) -> StorageResult<u64> {
        let handle = self.file(file)?;
        let count = handle.lock().page_count;
        Ok(count)
    }

    fn allocate_page(&self, file: FileId) -> StorageResult<PageIndex> {
        let handle = self.file(file)?;
        let mut f = handle.lock();
        let zero = vec![0u8; self.page_size];

        let page = if f.free_head.is_none() {
            let page = PageIndex::new(f.page_count);
            f.page_count += 1;
            page
        } else {
            let page = f.free_head;
            let freed = f.read(page, self.page_size)?;
            f.free_head = PageIndex::new(read_u64(&freed[0..8]));
            page
        };
        f.write(page, &zero)?;
        f.header_dirty = true;
        Ok(page)
    }

    fn free_page(&self, file: FileId, page: PageIndex) -> StorageResult<()> {
        let handle = self.file(file)?;
        let mut f = handle.lock();
        f.check(file, page)?;
        let mut buf = vec![0u8; self.page_size];
        buf[0..8].copy_from_slice(&f.free_head.as_u64().to_be_bytes());
        f.write(page, &buf)?;
        f.free_head = page;
        f.header_dirty = true;
        Ok(())
    }

    fn write_page(&self, file: FileId, page: PageIndex, data: &[u8]) -> StorageResult<()> {
        if data.len() != self.page_size {
            return Err(StorageError::InvalidPageSize {
                expected: self.page_size,
                actual: data.len(),
            });
        }
        let handle = self.file(file)?;
        let mut f = handle.lock();
        f.check(file, page)?;
        f.write(page, data)
    }

    fn flush(&self) -> StorageResult<()> {
        let handles: Vec<_> = self.table.read().files.values().cloned().collect();
        for handle in handles {
            let mut f = handle.lock();
            if f.header_dirty {
                f.write_header(self.page_size)?;
            }
            f.file.sync_all()?;
        }
        Ok(())
    }
}

impl Drop for FilePageStore {
    fn drop(&mut self) {
        // Best effort: headers are also persisted by every flush
        let _ = self.flush();
    }
}
