#![allow(missing_docs)]

use std::sync::Arc;

use bramble::containers::{Map, MultiMap, Set, Vector};
use bramble::{
    BrambleError, ContainerId, MemStore, MemStoreOptions, NodeStore, Registry, Result, TreeOptions,
};

fn store() -> Arc<dyn NodeStore> {
    Arc::new(MemStore::new(MemStoreOptions::default()))
}

fn small_store(node_capacity: u32) -> Arc<dyn NodeStore> {
    Arc::new(MemStore::new(MemStoreOptions::with_capacity(node_capacity)))
}

#[test]
fn seven_inserts_split_once_into_two_levels() -> Result<()> {
    let registry = Registry::with_defaults();
    let map: Map<u64, u64> =
        Map::create(store(), ContainerId(1), &registry, TreeOptions::small(4, 4))?;

    for key in [5u64, 3, 8, 1] {
        map.insert(&key, &(key * 10))?;
    }
    // Still a single leaf; the key is reachable before any split.
    let stats = map.verify()?;
    assert_eq!(stats.height, 1);
    assert_eq!(stats.nodes, 1);
    assert_eq!(map.get(&8)?, Some(80));

    for key in [9u64, 2, 7] {
        map.insert(&key, &(key * 10))?;
    }
    let stats = map.verify()?;
    assert_eq!(stats.height, 2, "exactly one split grows the tree to two levels");
    assert_eq!(stats.nodes, 3, "two leaves under one root");
    assert_eq!(stats.entries, 7);
    assert_eq!(map.get(&8)?, Some(80), "lookup survives the split");

    let keys: Vec<u64> = map.iter()?.map(|kv| kv.map(|(k, _)| k)).collect::<Result<_>>()?;
    assert_eq!(keys, vec![1, 2, 3, 5, 7, 8, 9]);
    Ok(())
}

#[test]
fn insert_replaces_and_returns_previous_value() -> Result<()> {
    let registry = Registry::with_defaults();
    let map: Map<u64, u64> =
        Map::create(store(), ContainerId(1), &registry, TreeOptions::default())?;
    assert_eq!(map.insert(&7, &70)?, None);
    assert_eq!(map.insert(&7, &71)?, Some(70));
    assert_eq!(map.get(&7)?, Some(71));
    assert_eq!(map.len()?, 1);
    Ok(())
}

#[test]
fn remove_of_absent_key_is_idempotent() -> Result<()> {
    let registry = Registry::with_defaults();
    let map: Map<u64, u64> =
        Map::create(store(), ContainerId(1), &registry, TreeOptions::small(4, 4))?;
    for key in 0..20u64 {
        map.insert(&key, &key)?;
    }
    let before = map.verify()?;
    assert_eq!(map.remove(&999)?, None);
    let after = map.verify()?;
    assert_eq!(before, after, "tree unchanged structurally and semantically");
    assert_eq!(map.len()?, 20);
    Ok(())
}

#[test]
fn thousand_inserts_then_half_removed() -> Result<()> {
    let registry = Registry::with_defaults();
    let map: Map<u64, u64> =
        Map::create(store(), ContainerId(1), &registry, TreeOptions::small(16, 16))?;
    for key in 0..1000u64 {
        map.insert(&key, &(key + 1))?;
    }
    let before = map.verify()?;

    for key in 0..500u64 {
        assert_eq!(map.remove(&key)?, Some(key + 1));
    }
    let after = map.verify()?;
    assert!(after.height <= before.height, "height never grows on removal");
    assert_eq!(after.entries, 500);
    for key in 500..1000u64 {
        assert_eq!(map.get(&key)?, Some(key + 1), "key {key}");
    }
    for key in 0..500u64 {
        assert_eq!(map.get(&key)?, None);
    }
    Ok(())
}

#[test]
fn byte_capacity_mode_splits_and_merges() -> Result<()> {
    let registry = Registry::with_defaults();
    // No entry caps: node byte capacity governs structure.
    let map: Map<Vec<u8>, Vec<u8>> = Map::create(
        small_store(512),
        ContainerId(1),
        &registry,
        TreeOptions::default(),
    )?;
    for i in 0..200u32 {
        let key = format!("key-{i:05}").into_bytes();
        let value = vec![b'v'; 16];
        map.insert(&key, &value)?;
    }
    let stats = map.verify()?;
    assert!(stats.height >= 2, "512-byte nodes cannot hold 200 entries flat");
    for i in (0..200u32).step_by(2) {
        let key = format!("key-{i:05}").into_bytes();
        assert!(map.remove(&key)?.is_some());
    }
    map.verify()?;
    assert_eq!(map.len()?, 100);
    Ok(())
}

#[test]
fn forward_and_backward_iteration_cross_leaf_boundaries() -> Result<()> {
    let registry = Registry::with_defaults();
    let map: Map<u64, u64> =
        Map::create(store(), ContainerId(1), &registry, TreeOptions::small(4, 4))?;
    for key in 0..50u64 {
        map.insert(&key, &key)?;
    }
    let forward: Vec<u64> = map.iter()?.map(|kv| kv.map(|(k, _)| k)).collect::<Result<_>>()?;
    assert_eq!(forward, (0..50).collect::<Vec<_>>());

    let mut cursor = map.cursor_seek(&49)?;
    let mut backward = vec![u64::from_be_bytes(cursor.key()?.try_into().expect("8-byte key"))];
    while cursor.retreat()? {
        backward.push(u64::from_be_bytes(cursor.key()?.try_into().expect("8-byte key")));
    }
    assert_eq!(backward, (0..50).rev().collect::<Vec<_>>());
    Ok(())
}

#[test]
fn cursor_positions_track_ordinals() -> Result<()> {
    let registry = Registry::with_defaults();
    let map: Map<u64, u64> =
        Map::create(store(), ContainerId(1), &registry, TreeOptions::small(4, 4))?;
    for key in 0..30u64 {
        map.insert(&(key * 2), &key)?;
    }
    let cursor = map.cursor_seek(&20)?;
    assert!(cursor.is_valid());
    assert_eq!(cursor.position(), 10);
    let miss = map.cursor_seek(&21)?;
    assert_eq!(miss.position(), 11, "miss lands at the would-insert ordinal");
    Ok(())
}

#[test]
fn multimap_keeps_duplicates_in_arrival_order() -> Result<()> {
    let registry = Registry::with_defaults();
    let mm: MultiMap<u64, u64> =
        MultiMap::create(store(), ContainerId(1), &registry, TreeOptions::small(4, 4))?;
    mm.insert(&5, &1)?;
    mm.insert(&3, &0)?;
    mm.insert(&5, &2)?;
    mm.insert(&5, &3)?;
    assert_eq!(mm.len()?, 4);
    assert_eq!(mm.get_all(&5)?, vec![1, 2, 3]);
    assert_eq!(mm.get_first(&5)?, Some(1));
    assert_eq!(mm.remove_first(&5)?, Some(1));
    assert_eq!(mm.get_all(&5)?, vec![2, 3]);
    mm.verify()?;
    Ok(())
}

#[test]
fn multimap_duplicate_run_spans_leaves() -> Result<()> {
    let registry = Registry::with_defaults();
    let mm: MultiMap<u64, u64> =
        MultiMap::create(store(), ContainerId(1), &registry, TreeOptions::small(4, 4))?;
    for i in 0..20u64 {
        mm.insert(&7, &i)?;
    }
    assert_eq!(mm.get_all(&7)?, (0..20).collect::<Vec<_>>());
    mm.verify()?;
    Ok(())
}

#[test]
fn set_membership() -> Result<()> {
    let registry = Registry::with_defaults();
    let set: Set<u64> = Set::create(store(), ContainerId(1), &registry, TreeOptions::small(4, 4))?;
    assert!(set.insert(&10)?);
    assert!(!set.insert(&10)?, "duplicate insert is rejected");
    for key in 0..40u64 {
        set.insert(&key)?;
    }
    assert_eq!(set.len()?, 40);
    assert!(set.contains(&10)?);
    assert!(set.remove(&10)?);
    assert!(!set.remove(&10)?);
    assert!(!set.contains(&10)?);
    let keys: Vec<u64> = set.iter()?.collect::<Result<_>>()?;
    assert_eq!(keys.len(), 39);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
    set.verify()?;
    Ok(())
}

#[test]
fn bulk_load_matches_incremental_build() -> Result<()> {
    let registry = Registry::with_defaults();
    let bulk: Map<u64, u64> =
        Map::create(store(), ContainerId(1), &registry, TreeOptions::small(8, 8))?;
    let incremental: Map<u64, u64> =
        Map::create(store(), ContainerId(2), &registry, TreeOptions::small(8, 8))?;

    let pairs: Vec<(u64, u64)> = (0..300).map(|k| (k, k * 3)).collect();
    bulk.bulk_load(pairs.clone())?;
    for (k, v) in &pairs {
        incremental.insert(k, v)?;
    }

    bulk.verify()?;
    let a: Vec<(u64, u64)> = bulk.iter()?.collect::<Result<_>>()?;
    let b: Vec<(u64, u64)> = incremental.iter()?.collect::<Result<_>>()?;
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn bulk_load_rejects_unsorted_input_and_nonempty_target() -> Result<()> {
    let registry = Registry::with_defaults();
    let map: Map<u64, u64> =
        Map::create(store(), ContainerId(1), &registry, TreeOptions::small(8, 8))?;
    let err = map.bulk_load(vec![(2, 0), (1, 0)]).unwrap_err();
    assert!(matches!(err, BrambleError::Invalid(_)));

    map.insert(&1, &1)?;
    let err = map.bulk_load(vec![(5, 0), (6, 0)]).unwrap_err();
    assert!(matches!(err, BrambleError::Invalid(_)));
    assert_eq!(map.len()?, 1, "failed bulk load leaves the tree untouched");
    Ok(())
}

#[test]
fn set_and_multimap_bulk_load() -> Result<()> {
    let registry = Registry::with_defaults();
    let set: Set<u64> = Set::create(store(), ContainerId(1), &registry, TreeOptions::small(8, 8))?;
    set.bulk_load((0..200u64).collect())?;
    set.verify()?;
    assert_eq!(set.len()?, 200);
    assert!(set.contains(&77)?);
    let err = set.bulk_load(vec![1, 1]).unwrap_err();
    assert!(matches!(err, BrambleError::Invalid(_)));

    let mm: MultiMap<u64, u64> =
        MultiMap::create(store(), ContainerId(1), &registry, TreeOptions::small(8, 8))?;
    // Duplicate keys are legal bulk input and keep their order.
    mm.bulk_load(vec![(1, 10), (2, 20), (2, 21), (3, 30)])?;
    mm.verify()?;
    assert_eq!(mm.get_all(&2)?, vec![20, 21]);
    let err = mm.bulk_load(vec![(2, 0), (1, 0)]).unwrap_err();
    assert!(matches!(err, BrambleError::Invalid(_)));
    Ok(())
}

#[test]
fn vector_positional_operations() -> Result<()> {
    let vec: Vector<u64> = Vector::create(store(), ContainerId(1), TreeOptions::small(4, 4))?;
    for i in 0..20u64 {
        vec.push(&(i * 100))?;
    }
    assert_eq!(vec.len()?, 20);
    assert_eq!(vec.get(3)?, Some(300));
    assert_eq!(vec.get(20)?, None);

    vec.insert(0, &1)?;
    vec.insert(21, &2)?;
    assert_eq!(vec.get(0)?, Some(1));
    assert_eq!(vec.get(21)?, Some(2));
    assert_eq!(vec.get(4)?, Some(300));

    vec.set(4, &301)?;
    assert_eq!(vec.get(4)?, Some(301));

    assert_eq!(vec.remove(0)?, 1);
    assert_eq!(vec.get(3)?, Some(301));
    assert_eq!(vec.len()?, 21);
    vec.verify()?;

    let err = vec.set(21, &0).unwrap_err();
    assert!(matches!(err, BrambleError::OutOfBounds { .. }));
    Ok(())
}

#[test]
fn vector_bulk_load() -> Result<()> {
    let vec: Vector<u64> = Vector::create(store(), ContainerId(1), TreeOptions::small(8, 8))?;
    let values: Vec<u64> = (0..500).collect();
    vec.bulk_load(values.clone())?;
    vec.verify()?;
    assert_eq!(vec.len()?, 500);
    for (i, expect) in values.iter().enumerate() {
        assert_eq!(vec.get(i as u64)?, Some(*expect));
    }
    Ok(())
}

#[test]
fn destroy_releases_every_node() -> Result<()> {
    let mem = Arc::new(MemStore::new(MemStoreOptions::default()));
    let handle: Arc<dyn NodeStore> = mem.clone();
    let registry = Registry::with_defaults();
    let map: Map<u64, u64> =
        Map::create(handle, ContainerId(1), &registry, TreeOptions::small(4, 4))?;
    for key in 0..100u64 {
        map.insert(&key, &key)?;
    }
    map.destroy()?;
    let stats = mem.stats();
    assert_eq!(stats.live, 0, "no live nodes survive destruction");
    assert_eq!(stats.retired, 0, "nothing pinned, everything reclaimed");
    Ok(())
}
