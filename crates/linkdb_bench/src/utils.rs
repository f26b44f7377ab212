//! Benchmark utilities.

use linkdb_core::{CollectionId, ConversionPolicy, Engine, RecordId, SegmentId};
use rand::seq::SliceRandom;
use rand::Rng;

/// Generate `count` record ids of one segment in random order.
pub fn shuffled_ids(count: usize) -> Vec<RecordId> {
    let mut ids: Vec<RecordId> = (0..count as u64)
        .map(|position| RecordId::new(SegmentId::new(1), position))
        .collect();
    ids.shuffle(&mut rand::thread_rng());
    ids
}

/// Generate random keys of the given length.
pub fn random_keys(count: usize, len: usize) -> Vec<Vec<u8>> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| (0..len).map(|_| rng.gen()).collect())
        .collect()
}

/// Creates an engine with one owner, `pool` committed records and an empty
/// collection governed by `policy`.
pub fn link_fixture(
    policy: ConversionPolicy,
    pool: usize,
) -> (Engine, CollectionId, Vec<RecordId>) {
    let engine = Engine::open_in_memory().unwrap();
    let segment = engine.create_segment("Bench", false).unwrap();
    let (collection, pool) = engine
        .transaction(|tx| {
            let owner = tx.create_record(segment)?;
            let pool = (0..pool)
                .map(|_| tx.create_record(segment))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((tx.create_link_collection_with(owner, policy)?, pool))
        })
        .unwrap();
    (engine, collection, pool)
}
