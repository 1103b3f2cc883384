#![allow(missing_docs)]

use std::sync::Arc;

use bramble::containers::Map;
use bramble::{
    BrambleError, ContainerId, MemStore, MemStoreOptions, NodeStore, Registry, Result, TreeOptions,
};

fn shared_store(opts: MemStoreOptions) -> (Arc<MemStore>, Arc<dyn NodeStore>) {
    let mem = Arc::new(MemStore::new(opts));
    let handle: Arc<dyn NodeStore> = mem.clone();
    (mem, handle)
}

#[test]
fn reader_snapshot_survives_writer_commit() -> Result<()> {
    let (_mem, store) = shared_store(MemStoreOptions::default());
    let registry = Registry::with_defaults();
    let map: Map<u64, u64> =
        Map::create(store, ContainerId(1), &registry, TreeOptions::small(4, 4))?;
    for key in 0..10u64 {
        map.insert(&key, &key)?;
    }

    let snapshot = map.snapshot()?;
    map.insert(&42, &420)?;
    map.insert(&5, &5000)?;

    // The captured root sees the pre-commit tree in its entirety.
    assert_eq!(map.get_in(&snapshot, &42)?, None);
    assert_eq!(map.get_in(&snapshot, &5)?, Some(5));
    // The live tree sees both commits.
    assert_eq!(map.get(&42)?, Some(420));
    assert_eq!(map.get(&5)?, Some(5000));
    Ok(())
}

#[test]
fn snapshot_keeps_reading_through_structural_churn() -> Result<()> {
    let (_mem, store) = shared_store(MemStoreOptions::default());
    let registry = Registry::with_defaults();
    let map: Map<u64, u64> =
        Map::create(store, ContainerId(1), &registry, TreeOptions::small(4, 4))?;
    for key in 0..50u64 {
        map.insert(&key, &key)?;
    }
    let snapshot = map.snapshot()?;

    // Churn hard enough to rewrite and reclaim most of the old tree.
    for key in 0..50u64 {
        map.remove(&key)?;
    }
    for key in 100..200u64 {
        map.insert(&key, &key)?;
    }

    for key in 0..50u64 {
        assert_eq!(map.get_in(&snapshot, &key)?, Some(key), "old key {key}");
    }
    assert_eq!(map.get_in(&snapshot, &100)?, None);
    Ok(())
}

#[test]
fn retired_nodes_reclaimed_after_last_pin_drops() -> Result<()> {
    let (mem, store) = shared_store(MemStoreOptions::default());
    let registry = Registry::with_defaults();
    let map: Map<u64, u64> =
        Map::create(store, ContainerId(1), &registry, TreeOptions::small(4, 4))?;
    for key in 0..30u64 {
        map.insert(&key, &key)?;
    }

    let snapshot = map.snapshot()?;
    for key in 0..30u64 {
        map.insert(&key, &(key + 1))?;
    }
    assert!(mem.stats().retired > 0, "superseded nodes parked for the reader");

    drop(snapshot);
    // A fresh release cycle sweeps everything the pin was holding.
    map.insert(&1000, &1)?;
    assert_eq!(mem.stats().retired, 0, "no pins, nothing stays retired");
    Ok(())
}

#[test]
fn failed_allocation_leaves_prior_root_authoritative() -> Result<()> {
    let (_mem, store) = shared_store(MemStoreOptions {
        node_capacity: 8192,
        max_nodes: 16,
    });
    let registry = Registry::with_defaults();
    let map: Map<u64, u64> =
        Map::create(store, ContainerId(1), &registry, TreeOptions::small(4, 4))?;

    let mut inserted = Vec::new();
    let mut failed = None;
    for key in 0..200u64 {
        match map.insert(&key, &(key * 2)) {
            Ok(_) => inserted.push(key),
            Err(BrambleError::OutOfMemory(_)) => {
                failed = Some(key);
                break;
            }
            Err(other) => return Err(other),
        }
    }
    let failed = failed.expect("16-node budget must run out");

    // The failed mutation committed nothing: every earlier key is intact
    // and the structure still verifies.
    map.verify()?;
    assert_eq!(map.len()?, inserted.len() as u64);
    for key in &inserted {
        assert_eq!(map.get(key)?, Some(key * 2), "key {key}");
    }
    assert_eq!(map.get(&failed)?, None);
    Ok(())
}

#[test]
fn aborted_mutation_frees_its_staged_nodes() -> Result<()> {
    let (mem, store) = shared_store(MemStoreOptions {
        node_capacity: 8192,
        max_nodes: 12,
    });
    let registry = Registry::with_defaults();
    let map: Map<u64, u64> =
        Map::create(store, ContainerId(1), &registry, TreeOptions::small(4, 4))?;

    let mut key = 0u64;
    loop {
        match map.insert(&key, &key) {
            Ok(_) => key += 1,
            Err(BrambleError::OutOfMemory(_)) => break,
            Err(other) => return Err(other),
        }
    }
    let after_failure = mem.stats();
    assert_eq!(after_failure.staged, 0, "no staged buffers leak");
    assert_eq!(after_failure.retired, 0, "aborted copies are swept");
    // The surviving tree is the last committed one, fully intact.
    map.verify()?;
    for k in 0..key {
        assert_eq!(map.get(&k)?, Some(k));
    }
    Ok(())
}
