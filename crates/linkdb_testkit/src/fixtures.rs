//! Test fixtures and engine helpers.
//!
//! Provides convenience functions for setting up test engines
//! and common test scenarios.

use linkdb_core::{Config, ConversionPolicy, Engine, SegmentId};
use linkdb_storage::InMemoryPageStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Page size used by test engines. Small pages make trees split early.
pub const TEST_PAGE_SIZE: usize = 512;

/// A test engine with automatic cleanup.
pub struct TestEngine {
    /// The engine instance.
    pub engine: Engine,
    /// The in-memory store, for page accounting.
    pub store: Option<Arc<InMemoryPageStore>>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestEngine {
    /// Creates a new in-memory test engine.
    pub fn memory() -> Self {
        Self::memory_with(test_config())
    }

    /// Creates an in-memory test engine with the given link policy.
    pub fn with_policy(policy: ConversionPolicy) -> Self {
        Self::memory_with(test_config().link_policy(policy))
    }

    /// Creates an in-memory test engine with custom configuration.
    pub fn memory_with(config: Config) -> Self {
        let store = Arc::new(
            InMemoryPageStore::with_page_size(config.page_size)
                .expect("Failed to create page store"),
        );
        let engine = Engine::with_store(store.clone(), config).expect("Failed to open engine");
        Self {
            engine,
            store: Some(store),
            temp_dir: None,
        }
    }

    /// Creates a new file-based test engine.
    pub fn file() -> Self {
        Self::file_with(test_config())
    }

    /// Creates a file-based test engine with custom configuration.
    pub fn file_with(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let engine = Engine::open_with_config(&temp_dir.path().join("db"), config)
            .expect("Failed to open file engine");
        Self {
            engine,
            store: None,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().join("db"))
    }

    /// Closes and reopens a file-based engine over the same directory.
    ///
    /// # Panics
    ///
    /// Panics for in-memory engines.
    pub fn reopen(self) -> Self {
        let path = self.path().expect("Only file engines can be reopened");
        let config = self.engine.config().clone();
        let temp_dir = self.temp_dir;
        drop(self.engine);
        let engine = Engine::open_with_config(&path, config).expect("Failed to reopen engine");
        Self {
            engine,
            store: None,
            temp_dir,
        }
    }

    /// Returns live pages of the in-memory store.
    ///
    /// # Panics
    ///
    /// Panics for file-based engines.
    pub fn live_pages(&self) -> u64 {
        self.store
            .as_ref()
            .expect("Page accounting needs an in-memory engine")
            .live_pages()
    }
}

impl std::ops::Deref for TestEngine {
    type Target = Engine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// The configuration test engines start from.
pub fn test_config() -> Config {
    Config::default().page_size(TEST_PAGE_SIZE)
}

/// Runs a test with a temporary in-memory engine.
pub fn with_temp_engine<F, R>(f: F) -> R
where
    F: FnOnce(&Engine) -> R,
{
    let test_engine = TestEngine::memory();
    f(&test_engine.engine)
}

/// Runs a test with a temporary file-based engine.
pub fn with_file_engine<F, R>(f: F) -> R
where
    F: FnOnce(&Engine, &Path) -> R,
{
    let test_engine = TestEngine::file();
    let path = test_engine.path().expect("File engine should have a path");
    f(&test_engine.engine, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use linkdb_core::{CollectionId, RecordId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_SEGMENT: AtomicUsize = AtomicUsize::new(0);

    /// An owner with one link collection and a pool of candidate members.
    #[derive(Debug, Clone)]
    pub struct LinkScenario {
        /// Segment of every record.
        pub segment: SegmentId,
        /// Owner of the collection.
        pub owner: RecordId,
        /// The collection.
        pub collection: CollectionId,
        /// Records that can be linked.
        pub pool: Vec<RecordId>,
    }

    /// Creates a segment, `pool` records, an owner and an empty collection.
    pub fn link_scenario(engine: &Engine, pool: usize) -> LinkScenario {
        let segment = engine
            .create_segment(
                &format!("Node{}", NEXT_SEGMENT.fetch_add(1, Ordering::Relaxed)),
                false,
            )
            .expect("Failed to create segment");
        engine
            .transaction(|tx| {
                let owner = tx.create_record(segment)?;
                let pool = (0..pool)
                    .map(|_| tx.create_record(segment))
                    .collect::<Result<Vec<_>, _>>()?;
                let collection = tx.create_link_collection(owner)?;
                Ok(LinkScenario {
                    segment,
                    owner,
                    collection,
                    pool,
                })
            })
            .expect("Failed to set up link scenario")
    }

    /// Like [`link_scenario`], with the collection already holding the
    /// first `linked` pool records.
    pub fn populated_links(engine: &Engine, pool: usize, linked: usize) -> LinkScenario {
        let scenario = link_scenario(engine, pool);
        engine
            .transaction(|tx| {
                let mut links = tx.links(scenario.collection)?;
                for rid in &scenario.pool[..linked] {
                    links.add(*rid)?;
                }
                Ok(())
            })
            .expect("Failed to populate links");
        scenario
    }
}
