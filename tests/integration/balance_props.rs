#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;

use bramble::containers::{BitVector, Map, Vector};
use bramble::{ContainerId, MemStore, MemStoreOptions, NodeStore, Registry, TreeOptions};

fn store(node_capacity: u32) -> Arc<dyn NodeStore> {
    Arc::new(MemStore::new(MemStoreOptions::with_capacity(node_capacity)))
}

#[derive(Debug, Clone)]
enum MapOp {
    Insert(u8, u16),
    Remove(u8),
}

fn map_ops() -> impl Strategy<Value = Vec<MapOp>> {
    prop::collection::vec(
        prop_oneof![
            (any::<u8>(), any::<u16>()).prop_map(|(k, v)| MapOp::Insert(k, v)),
            any::<u8>().prop_map(MapOp::Remove),
        ],
        1..300,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// The balance and summary invariants hold after any operation
    /// sequence, and the tree agrees with an in-memory model.
    #[test]
    fn map_matches_model_under_random_ops(ops in map_ops(), leaf_cap in 4usize..10, branch_cap in 4usize..10) {
        let registry = Registry::with_defaults();
        let map: Map<u64, u64> = Map::create(
            store(8192),
            ContainerId(1),
            &registry,
            TreeOptions::small(leaf_cap, branch_cap),
        ).unwrap();
        let mut model: BTreeMap<u64, u64> = BTreeMap::new();

        for op in &ops {
            match op {
                MapOp::Insert(k, v) => {
                    let (k, v) = (u64::from(*k), u64::from(*v));
                    let old = map.insert(&k, &v).unwrap();
                    prop_assert_eq!(old, model.insert(k, v));
                }
                MapOp::Remove(k) => {
                    let k = u64::from(*k);
                    let old = map.remove(&k).unwrap();
                    prop_assert_eq!(old, model.remove(&k));
                }
            }
        }

        let stats = map.verify().unwrap();
        prop_assert_eq!(stats.entries, model.len() as u64);
        let found: Vec<(u64, u64)> = map.iter().unwrap().collect::<bramble::Result<_>>().unwrap();
        let expect: Vec<(u64, u64)> = model.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(found, expect);
    }

    /// Byte-governed nodes (no entry caps) keep the same guarantees.
    #[test]
    fn byte_mode_map_matches_model(ops in map_ops()) {
        let registry = Registry::with_defaults();
        let map: Map<u64, u64> = Map::create(
            store(256),
            ContainerId(1),
            &registry,
            TreeOptions::default(),
        ).unwrap();
        let mut model: BTreeMap<u64, u64> = BTreeMap::new();

        for op in &ops {
            match op {
                MapOp::Insert(k, v) => {
                    let (k, v) = (u64::from(*k), u64::from(*v));
                    map.insert(&k, &v).unwrap();
                    model.insert(k, v);
                }
                MapOp::Remove(k) => {
                    let k = u64::from(*k);
                    map.remove(&k).unwrap();
                    model.remove(&k);
                }
            }
        }

        let stats = map.verify().unwrap();
        prop_assert_eq!(stats.entries, model.len() as u64);
        for (k, v) in &model {
            prop_assert_eq!(map.get(k).unwrap(), Some(*v));
        }
    }

    /// Positional edits agree with a vector model.
    #[test]
    fn sequence_matches_model(ops in prop::collection::vec((any::<bool>(), any::<u16>(), any::<u16>()), 1..200)) {
        let vec: Vector<u64> = Vector::create(
            store(8192),
            ContainerId(1),
            TreeOptions::small(5, 5),
        ).unwrap();
        let mut model: Vec<u64> = Vec::new();

        for (insert, pos, value) in &ops {
            if *insert || model.is_empty() {
                let at = u64::from(*pos) % (model.len() as u64 + 1);
                vec.insert(at, &u64::from(*value)).unwrap();
                model.insert(at as usize, u64::from(*value));
            } else {
                let at = u64::from(*pos) % (model.len() as u64);
                let removed = vec.remove(at).unwrap();
                prop_assert_eq!(removed, model.remove(at as usize));
            }
        }

        vec.verify().unwrap();
        prop_assert_eq!(vec.len().unwrap(), model.len() as u64);
        for (i, expect) in model.iter().enumerate() {
            prop_assert_eq!(vec.get(i as u64).unwrap(), Some(*expect));
        }
    }

    /// Rank/select duality on arbitrary bit patterns spread over many
    /// nodes: `rank(select(k)) == k` and `select(rank(i)) >= i`.
    #[test]
    fn rank_select_duality(pattern in prop::collection::vec(any::<bool>(), 1..1500)) {
        let registry = Registry::with_defaults();
        let bits = BitVector::create(
            store(8192),
            ContainerId(1),
            &registry,
            TreeOptions::small(48, 6),
        ).unwrap();
        bits.bulk_load(pattern.clone()).unwrap();
        bits.verify().unwrap();

        let ones = pattern.iter().filter(|&&b| b).count() as u64;
        prop_assert_eq!(bits.count_ones().unwrap(), ones);

        for symbol in [true, false] {
            let total = if symbol { ones } else { pattern.len() as u64 - ones };
            for k in (0..total).step_by(17) {
                let pos = bits.select(k, symbol).unwrap().expect("within total");
                prop_assert_eq!(bits.rank(pos, symbol).unwrap(), k);
                prop_assert_eq!(bits.get(pos).unwrap(), symbol);
            }
        }
        for i in (0..pattern.len() as u64).step_by(23) {
            let r = bits.rank(i, true).unwrap();
            if let Some(pos) = bits.select(r, true).unwrap() {
                prop_assert!(pos >= i);
            }
        }
    }
}
