//! Engine facade.

use crate::btree::{CollectionPointer, IsolatedTree, SharedBTreeManager};
use crate::collection::{LinkTable, Representation};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexDefinition, IndexRegistry};
use crate::journal::KeyPolicy;
use crate::record::{RecordId, RecordMeta, RecordTable};
use crate::schema::{Schema, SegmentDef};
use crate::snapshot::CommitHistory;
use crate::stats::{EngineStats, StatsSnapshot};
use crate::transaction::{CommitHook, Transaction, TransactionManager};
use crate::types::{CollectionId, IndexId, SegmentId, SequenceNumber};
use linkdb_storage::{FilePageStore, InMemoryPageStore, PageStore};
use parking_lot::RwLock;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State shared by the engine and every transaction it starts.
pub(crate) struct EngineShared {
    pub config: Config,
    pub trees: Arc<SharedBTreeManager>,
    pub schema: Schema,
    pub records: RecordTable,
    pub links: LinkTable,
    pub indexes: IndexRegistry,
    pub txns: TransactionManager,
    pub history: CommitHistory,
    pub hooks: RwLock<Vec<Arc<dyn CommitHook>>>,
    pub stats: EngineStats,
}

impl EngineShared {
    /// Drops commit history no active transaction needs and releases the
    /// trees it kept alive.
    pub fn reclaim(&self) {
        let ready = {
            let _gate = self.history.read_gate();
            self.history.prune(self.txns.oldest_snapshot())
        };
        for ptr in ready {
            match self.trees.release_tree(ptr) {
                Ok(()) => {
                    self.stats.record_tree_released();
                    debug!(pointer = %ptr, "released retired tree");
                }
                Err(err) => warn!(pointer = %ptr, error = %err, "failed to release retired tree"),
            }
        }
    }
}

/// The main engine handle.
///
/// `Engine` is cheap to clone; clones share all state and may be used from
/// any number of threads.
///
/// # Example
///
/// ```rust
/// use linkdb_core::{Engine, KeyPolicy};
///
/// let engine = Engine::open_in_memory().unwrap();
/// let people = engine.create_segment("Person", false).unwrap();
/// let by_email = engine
///     .create_index("Person.email", people, true, KeyPolicy::SingleKeyPerRecord)
///     .unwrap();
///
/// let alice = engine
///     .transaction(|tx| {
///         let alice = tx.create_record(people)?;
///         tx.index_put(by_email, &"alice@example.com".to_string(), alice)?;
///         Ok(alice)
///     })
///     .unwrap();
///
/// let tx = engine.begin().unwrap();
/// assert_eq!(
///     tx.index_get(by_email, &"alice@example.com".to_string()).unwrap(),
///     vec![alice]
/// );
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineShared>,
}

impl Engine {
    /// Opens an engine over a fresh in-memory page store.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with(Config::default())
    }

    /// Opens an in-memory engine with custom configuration.
    pub fn open_in_memory_with(config: Config) -> CoreResult<Self> {
        let store = InMemoryPageStore::with_page_size(config.page_size)?;
        Self::with_store(Arc::new(store), config)
    }

    /// Opens an engine over a page store directory, creating it if needed.
    ///
    /// Trees committed earlier stay readable through
    /// [`load_isolated_tree`](Self::load_isolated_tree).
    ///
    /// # Errors
    ///
    /// Fails with a storage error if another process holds the directory
    /// lock or the page size differs from the one the files were created
    /// with.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a file-backed engine with custom configuration.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let store = FilePageStore::open_with_page_size(path, config.page_size)?;
        info!(path = %path.display(), "opened engine");
        Self::with_store(Arc::new(store), config)
    }

    /// Opens an engine over any page store.
    pub fn with_store(store: Arc<dyn PageStore>, config: Config) -> CoreResult<Self> {
        if config.max_hook_passes == 0 {
            return Err(CoreError::invalid_operation(
                "max_hook_passes must be at least 1",
            ));
        }
        let shared = EngineShared {
            trees: Arc::new(SharedBTreeManager::new(store)),
            config,
            schema: Schema::default(),
            records: RecordTable::default(),
            links: LinkTable::default(),
            indexes: IndexRegistry::default(),
            txns: TransactionManager::default(),
            history: CommitHistory::default(),
            hooks: RwLock::new(Vec::new()),
            stats: EngineStats::new(),
        };
        Ok(Self {
            inner: Arc::new(shared),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Creates a segment.
    pub fn create_segment(&self, name: &str, is_abstract: bool) -> CoreResult<SegmentId> {
        let id = self.inner.schema.create_segment(name, is_abstract)?;
        debug!(segment = %id, name, is_abstract, "created segment");
        Ok(id)
    }

    /// Looks up a segment.
    pub fn segment(&self, id: SegmentId) -> CoreResult<SegmentDef> {
        self.inner.schema.segment(id)
    }

    /// Looks up a segment by name.
    #[must_use]
    pub fn segment_by_name(&self, name: &str) -> Option<SegmentDef> {
        self.inner.schema.segment_by_name(name)
    }

    /// Creates a secondary index over the records of `segment`. The index
    /// tree lives in `index_<name>.ibt`.
    pub fn create_index(
        &self,
        name: &str,
        segment: SegmentId,
        unique: bool,
        key_policy: KeyPolicy,
    ) -> CoreResult<IndexId> {
        self.inner.schema.segment(segment)?;
        self.inner
            .indexes
            .create(&self.inner.trees, name, segment, unique, key_policy)
    }

    /// Looks up an index definition.
    pub fn index(&self, id: IndexId) -> CoreResult<IndexDefinition> {
        self.inner.indexes.get(id)
    }

    /// Looks up an index definition by name.
    #[must_use]
    pub fn index_by_name(&self, name: &str) -> Option<IndexDefinition> {
        self.inner.indexes.by_name(name)
    }

    /// Returns the tree pointer of an index.
    pub fn index_pointer(&self, id: IndexId) -> CoreResult<CollectionPointer> {
        Ok(self.inner.indexes.get(id)?.pointer)
    }

    /// Begins a transaction.
    ///
    /// The transaction reads the state of the latest commit at this point;
    /// later commits stay invisible to it.
    pub fn begin(&self) -> CoreResult<Transaction> {
        let (txid, snapshot) = {
            let _gate = self.inner.history.read_gate();
            self.inner.txns.begin()
        };
        self.inner.stats.record_transaction_start();
        Ok(Transaction::new(txid, snapshot, Arc::clone(&self.inner)))
    }

    /// Commits a transaction.
    ///
    /// On error nothing is applied and the transaction is rolled back.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ConcurrencyConflict`] if a record the transaction
    ///   relied on changed since it was read
    /// - [`CoreError::DuplicateUniqueKey`] on unique index collisions
    /// - [`CoreError::TransactionAborted`] if commit hooks do not settle or
    ///   the transaction was marked rollback-only
    pub fn commit(&self, tx: &mut Transaction) -> CoreResult<SequenceNumber> {
        self.check_owner(tx)?;
        tx.commit()
    }

    /// Rolls back a transaction, releasing every tree it created.
    pub fn rollback(&self, tx: &mut Transaction) -> CoreResult<()> {
        self.check_owner(tx)?;
        if !tx.is_active() {
            return Err(CoreError::invalid_operation(format!(
                "transaction {} is {:?}",
                tx.id(),
                tx.state()
            )));
        }
        tx.rollback_inner();
        Ok(())
    }

    fn check_owner(&self, tx: &Transaction) -> CoreResult<()> {
        if tx.belongs_to(&self.inner) {
            Ok(())
        } else {
            Err(CoreError::invalid_operation(format!(
                "transaction {} belongs to another engine",
                tx.id()
            )))
        }
    }

    /// Runs `f` in a transaction, committing on `Ok` and rolling back on
    /// `Err`.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction) -> CoreResult<T>,
    {
        let mut tx = self.begin()?;
        match f(&mut tx) {
            Ok(value) => {
                self.commit(&mut tx)?;
                Ok(value)
            }
            Err(err) => {
                if tx.is_active() {
                    tx.rollback_inner();
                }
                Err(err)
            }
        }
    }

    /// Registers a commit hook. Hooks run in registration order.
    pub fn register_hook(&self, hook: Arc<dyn CommitHook>) {
        debug!(hook = hook.name(), "registered commit hook");
        self.inner.hooks.write().push(hook);
    }

    /// Returns the shared B-tree manager.
    #[must_use]
    pub fn trees(&self) -> &Arc<SharedBTreeManager> {
        &self.inner.trees
    }

    /// Opens a read view of a tree's committed entries.
    pub fn load_isolated_tree(&self, pointer: CollectionPointer) -> CoreResult<IsolatedTree<'_>> {
        self.inner.trees.load_isolated_tree(pointer)
    }

    /// Returns committed record metadata.
    #[must_use]
    pub fn record_meta(&self, rid: RecordId) -> Option<RecordMeta> {
        self.inner.records.get(rid)
    }

    /// Returns the number of committed records.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.inner.records.len()
    }

    /// Returns the committed representation of a link collection.
    #[must_use]
    pub fn link_representation(&self, id: CollectionId) -> Option<Representation> {
        self.inner.links.get(id).map(|state| state.repr)
    }

    /// Returns the number of committed link collections.
    #[must_use]
    pub fn link_collection_count(&self) -> usize {
        self.inner.links.len()
    }

    /// Returns the sequence number of the latest commit.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        self.inner.txns.committed_seq()
    }

    /// Returns the number of trees a commit stopped referencing that are
    /// kept for transactions still reading older snapshots.
    #[must_use]
    pub fn retired_trees(&self) -> usize {
        self.inner.history.retired_len()
    }

    /// Returns the number of transactions neither committed nor rolled back.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.inner.txns.active_count()
    }

    /// Flushes the page store.
    pub fn flush(&self) -> CoreResult<()> {
        self.inner.trees.store().flush()?;
        Ok(())
    }

    /// Returns a snapshot of the engine counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("committed_seq", &self.inner.txns.committed_seq())
            .finish_non_exhaustive()
    }
}
