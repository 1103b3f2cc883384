#![allow(missing_docs)]

use std::sync::Arc;

use bramble::containers::BitVector;
use bramble::{ContainerId, MemStore, MemStoreOptions, NodeStore, Registry, Result, TreeOptions};

fn store() -> Arc<dyn NodeStore> {
    Arc::new(MemStore::new(MemStoreOptions::default()))
}

fn build(pattern: &str, opts: TreeOptions) -> Result<BitVector> {
    let registry = Registry::with_defaults();
    let bits = BitVector::create(store(), ContainerId(1), &registry, opts)?;
    for c in pattern.chars() {
        bits.push(c == '1')?;
    }
    Ok(bits)
}

#[test]
fn rank_and_select_on_small_sequence() -> Result<()> {
    let bits = build("101101011", TreeOptions::default())?;
    assert_eq!(bits.len()?, 9);
    assert_eq!(bits.count_ones()?, 6);
    assert_eq!(bits.rank(4, true)?, 3);
    assert_eq!(bits.rank(4, false)?, 1);
    assert_eq!(bits.rank(9, true)?, 6);
    // Ones at positions 0, 2, 3, 5, 7, 8; zeros at 1, 4, 6.
    assert_eq!(bits.select(0, true)?, Some(0));
    assert_eq!(bits.select(2, true)?, Some(3));
    assert_eq!(bits.select(5, true)?, Some(8));
    assert_eq!(bits.select(6, true)?, None);
    assert_eq!(bits.select(1, false)?, Some(4));
    assert_eq!(bits.select(3, false)?, None);
    Ok(())
}

#[test]
fn select_is_left_inverse_of_rank_across_nodes() -> Result<()> {
    // Small leaves force the sequence across many nodes.
    let pattern: String = (0..4000u32)
        .map(|i| if (i.wrapping_mul(2654435761)) % 5 < 2 { '1' } else { '0' })
        .collect();
    let bits = build(&pattern, TreeOptions::small(64, 8))?;
    let stats = bits.verify()?;
    assert!(stats.height >= 3, "sequence spans multiple levels");

    for symbol in [true, false] {
        let total = if symbol {
            bits.count_ones()?
        } else {
            bits.len()? - bits.count_ones()?
        };
        for k in (0..total).step_by(97) {
            let pos = bits.select(k, symbol)?.expect("k below total");
            assert_eq!(bits.rank(pos, symbol)?, k, "rank(select({k}))");
            assert_eq!(bits.get(pos)?, symbol);
        }
        assert_eq!(bits.select(total, symbol)?, None);
    }

    // select(rank(i)) lands at or after i.
    for i in (0..bits.len()?).step_by(131) {
        let r = bits.rank(i, true)?;
        if let Some(pos) = bits.select(r, true)? {
            assert!(pos >= i, "select(rank({i})) = {pos}");
        }
    }
    Ok(())
}

#[test]
fn rank_matches_naive_count_after_edits() -> Result<()> {
    let registry = Registry::with_defaults();
    let bits = BitVector::create(store(), ContainerId(1), &registry, TreeOptions::small(32, 8))?;
    let mut model: Vec<bool> = Vec::new();

    for i in 0..600u64 {
        let bit = i % 3 == 0;
        bits.push(bit)?;
        model.push(bit);
    }
    // Mixed edits: mid-sequence inserts, removals and flips.
    for i in 0..100u64 {
        let at = (i * 37) % (model.len() as u64);
        bits.insert(at, true)?;
        model.insert(at as usize, true);
    }
    for i in 0..100u64 {
        let at = (i * 53) % (model.len() as u64);
        bits.remove(at)?;
        model.remove(at as usize);
    }
    for i in 0..50u64 {
        let at = (i * 29) % (model.len() as u64);
        bits.set(at, i % 2 == 0)?;
        model[at as usize] = i % 2 == 0;
    }

    bits.verify()?;
    assert_eq!(bits.len()?, model.len() as u64);
    let ones: u64 = model.iter().filter(|&&b| b).count() as u64;
    assert_eq!(bits.count_ones()?, ones);
    for i in (0..=model.len()).step_by(61) {
        let naive = model[..i].iter().filter(|&&b| b).count() as u64;
        assert_eq!(bits.rank(i as u64, true)?, naive, "rank({i})");
        assert_eq!(bits.rank(i as u64, false)?, i as u64 - naive);
    }
    Ok(())
}

#[test]
fn bulk_load_bit_sequence() -> Result<()> {
    let registry = Registry::with_defaults();
    let bits = BitVector::create(store(), ContainerId(1), &registry, TreeOptions::small(64, 8))?;
    let pattern: Vec<bool> = (0..2000u32).map(|i| i % 7 == 0).collect();
    bits.bulk_load(pattern.clone())?;
    bits.verify()?;
    assert_eq!(bits.len()?, 2000);
    let ones = pattern.iter().filter(|&&b| b).count() as u64;
    assert_eq!(bits.count_ones()?, ones);
    for (i, &bit) in pattern.iter().enumerate().step_by(73) {
        assert_eq!(bits.get(i as u64)?, bit);
    }
    Ok(())
}

#[test]
fn summary_tracks_ones_through_splits_and_merges() -> Result<()> {
    let registry = Registry::with_defaults();
    let bits = BitVector::create(store(), ContainerId(1), &registry, TreeOptions::small(16, 4))?;
    for i in 0..400u64 {
        bits.push(i % 2 == 0)?;
    }
    assert_eq!(bits.count_ones()?, 200);
    // Remove every bit in the first half, forcing merges.
    for _ in 0..200 {
        bits.remove(0)?;
    }
    bits.verify()?;
    assert_eq!(bits.len()?, 200);
    assert_eq!(bits.count_ones()?, 100);
    Ok(())
}
