//! Typed container APIs assembled from the generic tree core.
//!
//! Each container owns a [`TreeCore`] bound to a registry descriptor and
//! translates between typed keys/values and the engine's byte-level
//! entries. Capability surfaces are composed per kind: keyed containers
//! expose key lookup, sequences expose positional access, bit sequences
//! add rank/select.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::codec::{FixedCodec, KeyCodec, ValCodec};
use crate::config::TreeOptions;
use crate::error::{BrambleError, Result};
use crate::node::Entry;
use crate::registry::{ContainerKind, Descriptor, Registry};
use crate::store::{NodeStore, Snapshot};
use crate::tree::{Cursor, TreeCore, TreeStats};
use crate::types::ContainerId;

fn encode_key<K: KeyCodec>(key: &K) -> Vec<u8> {
    let mut out = Vec::new();
    K::encode_key(key, &mut out);
    out
}

fn encode_val<V: ValCodec>(value: &V) -> Vec<u8> {
    let mut out = Vec::new();
    V::encode_val(value, &mut out);
    out
}

/// Ordered key/value map with unique keys.
pub struct Map<K, V> {
    core: TreeCore,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: KeyCodec, V: ValCodec> Map<K, V> {
    /// Creates a new map container.
    pub fn create(
        store: Arc<dyn NodeStore>,
        id: ContainerId,
        registry: &Registry,
        opts: TreeOptions,
    ) -> Result<Self> {
        let desc = registry.descriptor(ContainerKind::Map)?.clone();
        Ok(Self {
            core: TreeCore::create(store, id, desc, opts)?,
            _marker: PhantomData,
        })
    }

    /// Binds to an existing map container.
    pub fn open(
        store: Arc<dyn NodeStore>,
        id: ContainerId,
        registry: &Registry,
        opts: TreeOptions,
    ) -> Result<Self> {
        let desc = registry.descriptor(ContainerKind::Map)?.clone();
        Ok(Self {
            core: TreeCore::open(store, id, desc, opts)?,
            _marker: PhantomData,
        })
    }

    /// Inserts or replaces; returns the previous value on replacement.
    pub fn insert(&self, key: &K, value: &V) -> Result<Option<V>> {
        let old = self.core.insert_key(&encode_key(key), &encode_val(value))?;
        old.map(|bytes| V::decode_val(&bytes)).transpose()
    }

    /// Looks up a key in the current committed state.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let found = self.core.lookup_key(&encode_key(key))?;
        found.map(|bytes| V::decode_val(&bytes)).transpose()
    }

    /// Looks up a key against a captured snapshot.
    pub fn get_in(&self, snap: &Snapshot, key: &K) -> Result<Option<V>> {
        let found = self.core.lookup_key_in(snap, &encode_key(key))?;
        found.map(|bytes| V::decode_val(&bytes)).transpose()
    }

    /// Removes a key; absent keys are a no-op returning `None`.
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        let old = self.core.remove_key(&encode_key(key))?;
        old.map(|bytes| V::decode_val(&bytes)).transpose()
    }

    /// Whether the key is present.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self.core.lookup_key(&encode_key(key))?.is_some())
    }

    /// Number of entries.
    pub fn len(&self) -> Result<u64> {
        self.core.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Captures a consistent read view.
    pub fn snapshot(&self) -> Result<Snapshot> {
        self.core.snapshot()
    }

    /// Cursor at the first entry.
    pub fn cursor_first(&self) -> Result<Cursor> {
        let snap = self.core.snapshot()?;
        let out = self.core.walk_pos(&snap, 0)?;
        Cursor::from_walk(snap, &out)
    }

    /// Cursor at the leftmost entry with `key_at >= key`.
    pub fn cursor_seek(&self, key: &K) -> Result<Cursor> {
        let snap = self.core.snapshot()?;
        let out = self.core.walk_key(&snap, &encode_key(key))?;
        Cursor::from_walk(snap, &out)
    }

    /// In-order iterator over all entries.
    pub fn iter(&self) -> Result<PairIter<K, V>> {
        Ok(PairIter {
            cursor: self.cursor_first()?,
            _marker: PhantomData,
        })
    }

    /// Builds the map bottom-up from strictly-increasing key order.
    pub fn bulk_load(&self, pairs: Vec<(K, V)>) -> Result<()> {
        let mut entries = Vec::with_capacity(pairs.len());
        let mut prev: Option<Vec<u8>> = None;
        for (key, value) in &pairs {
            let encoded = encode_key(key);
            if let Some(prev) = &prev {
                if prev.as_slice() >= encoded.as_slice() {
                    return Err(BrambleError::Invalid("bulk load input not strictly sorted"));
                }
            }
            entries.push(Entry::Keyed {
                key: encoded.clone(),
                value: encode_val(value),
            });
            prev = Some(encoded);
        }
        self.core.bulk_load(entries)
    }

    /// Recomputes and checks every structural invariant.
    pub fn verify(&self) -> Result<TreeStats> {
        self.core.verify()
    }

    /// Releases the tree's nodes and drops the container.
    pub fn destroy(self) -> Result<()> {
        self.core.destroy()
    }
}

/// Decoded-pair iterator over a keyed cursor.
pub struct PairIter<K, V> {
    cursor: Cursor,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: KeyCodec, V: ValCodec> Iterator for PairIter<K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.cursor.is_valid() {
            return None;
        }
        let item = (|| -> Result<(K, V)> {
            let key = K::decode_key(&self.cursor.key()?)?;
            let value = V::decode_val(&self.cursor.value()?)?;
            Ok((key, value))
        })();
        if let Err(err) = self.cursor.advance() {
            return Some(Err(err));
        }
        Some(item)
    }
}

/// Ordered key set.
pub struct Set<K> {
    core: TreeCore,
    _marker: PhantomData<fn() -> K>,
}

impl<K: KeyCodec> Set<K> {
    /// Creates a new set container.
    pub fn create(
        store: Arc<dyn NodeStore>,
        id: ContainerId,
        registry: &Registry,
        opts: TreeOptions,
    ) -> Result<Self> {
        let desc = registry.descriptor(ContainerKind::Set)?.clone();
        Ok(Self {
            core: TreeCore::create(store, id, desc, opts)?,
            _marker: PhantomData,
        })
    }

    /// Inserts a key; returns `false` when it was already present.
    pub fn insert(&self, key: &K) -> Result<bool> {
        Ok(self.core.insert_key(&encode_key(key), &[])?.is_none())
    }

    /// Whether the key is present.
    pub fn contains(&self, key: &K) -> Result<bool> {
        Ok(self.core.lookup_key(&encode_key(key))?.is_some())
    }

    /// Removes a key; returns `false` when it was absent.
    pub fn remove(&self, key: &K) -> Result<bool> {
        Ok(self.core.remove_key(&encode_key(key))?.is_some())
    }

    /// Number of keys.
    pub fn len(&self) -> Result<u64> {
        self.core.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// In-order iterator over all keys.
    pub fn iter(&self) -> Result<KeyIter<K>> {
        let snap = self.core.snapshot()?;
        let out = self.core.walk_pos(&snap, 0)?;
        Ok(KeyIter {
            cursor: Cursor::from_walk(snap, &out)?,
            _marker: PhantomData,
        })
    }

    /// Builds the set bottom-up from strictly-increasing key order.
    pub fn bulk_load(&self, keys: Vec<K>) -> Result<()> {
        let mut entries = Vec::with_capacity(keys.len());
        let mut prev: Option<Vec<u8>> = None;
        for key in &keys {
            let encoded = encode_key(key);
            if let Some(prev) = &prev {
                if prev.as_slice() >= encoded.as_slice() {
                    return Err(BrambleError::Invalid("bulk load input not strictly sorted"));
                }
            }
            entries.push(Entry::Keyed {
                key: encoded.clone(),
                value: Vec::new(),
            });
            prev = Some(encoded);
        }
        self.core.bulk_load(entries)
    }

    /// Recomputes and checks every structural invariant.
    pub fn verify(&self) -> Result<TreeStats> {
        self.core.verify()
    }
}

/// Decoded-key iterator over a set cursor.
pub struct KeyIter<K> {
    cursor: Cursor,
    _marker: PhantomData<fn() -> K>,
}

impl<K: KeyCodec> Iterator for KeyIter<K> {
    type Item = Result<K>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.cursor.is_valid() {
            return None;
        }
        let item = self.cursor.key().and_then(|bytes| K::decode_key(&bytes));
        if let Err(err) = self.cursor.advance() {
            return Some(Err(err));
        }
        Some(item)
    }
}

/// Ordered key/value map allowing duplicate keys; duplicates keep arrival
/// order.
pub struct MultiMap<K, V> {
    core: TreeCore,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: KeyCodec, V: ValCodec> MultiMap<K, V> {
    /// Creates a new multimap container.
    pub fn create(
        store: Arc<dyn NodeStore>,
        id: ContainerId,
        registry: &Registry,
        opts: TreeOptions,
    ) -> Result<Self> {
        let desc = registry.descriptor(ContainerKind::MultiMap)?.clone();
        Ok(Self {
            core: TreeCore::create(store, id, desc, opts)?,
            _marker: PhantomData,
        })
    }

    /// Appends an entry after any existing run of equal keys.
    pub fn insert(&self, key: &K, value: &V) -> Result<()> {
        self.core.insert_key(&encode_key(key), &encode_val(value))?;
        Ok(())
    }

    /// First value stored under `key`.
    pub fn get_first(&self, key: &K) -> Result<Option<V>> {
        let found = self.core.lookup_key(&encode_key(key))?;
        found.map(|bytes| V::decode_val(&bytes)).transpose()
    }

    /// Every value stored under `key`, in arrival order.
    pub fn get_all(&self, key: &K) -> Result<Vec<V>> {
        let encoded = encode_key(key);
        let snap = self.core.snapshot()?;
        let out = self.core.walk_key(&snap, &encoded)?;
        let mut cursor = Cursor::from_walk(snap, &out)?;
        let mut values = Vec::new();
        while cursor.is_valid() && cursor.key()? == encoded {
            values.push(V::decode_val(&cursor.value()?)?);
            if !cursor.advance()? {
                break;
            }
        }
        Ok(values)
    }

    /// Removes the oldest entry under `key`.
    pub fn remove_first(&self, key: &K) -> Result<Option<V>> {
        let old = self.core.remove_key(&encode_key(key))?;
        old.map(|bytes| V::decode_val(&bytes)).transpose()
    }

    /// Number of entries (duplicates included).
    pub fn len(&self) -> Result<u64> {
        self.core.len()
    }

    /// Whether the multimap is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Builds the multimap bottom-up from pairs sorted by key; duplicate
    /// keys keep their input order.
    pub fn bulk_load(&self, pairs: Vec<(K, V)>) -> Result<()> {
        let mut entries = Vec::with_capacity(pairs.len());
        let mut prev: Option<Vec<u8>> = None;
        for (key, value) in &pairs {
            let encoded = encode_key(key);
            if let Some(prev) = &prev {
                if prev.as_slice() > encoded.as_slice() {
                    return Err(BrambleError::Invalid("bulk load input not sorted"));
                }
            }
            entries.push(Entry::Keyed {
                key: encoded.clone(),
                value: encode_val(value),
            });
            prev = Some(encoded);
        }
        self.core.bulk_load(entries)
    }

    /// Recomputes and checks every structural invariant.
    pub fn verify(&self) -> Result<TreeStats> {
        self.core.verify()
    }
}

/// Positional sequence of fixed-width elements.
pub struct Vector<V> {
    core: TreeCore,
    _marker: PhantomData<fn() -> V>,
}

impl<V: FixedCodec> Vector<V> {
    /// Creates a new sequence container sized for `V`.
    pub fn create(store: Arc<dyn NodeStore>, id: ContainerId, opts: TreeOptions) -> Result<Self> {
        let width = u16::try_from(V::WIDTH)
            .map_err(|_| BrambleError::Invalid("element width exceeds u16"))?;
        let desc = Descriptor::sequence(width);
        Ok(Self {
            core: TreeCore::create(store, id, desc, opts)?,
            _marker: PhantomData,
        })
    }

    fn encode(value: &V) -> Vec<u8> {
        let mut out = Vec::new();
        V::encode_fixed(value, &mut out);
        out
    }

    fn decode(entry: Entry) -> Result<V> {
        match entry {
            Entry::Seq(bytes) => V::decode_fixed(&bytes),
            _ => Err(BrambleError::Corruption("sequence entry kind mismatch")),
        }
    }

    /// Element at `pos`, or `None` past the end.
    pub fn get(&self, pos: u64) -> Result<Option<V>> {
        self.core.entry_at(pos)?.map(Self::decode).transpose()
    }

    /// Inserts an element at `pos`, shifting the tail.
    pub fn insert(&self, pos: u64, value: &V) -> Result<()> {
        self.core.insert_pos(pos, Entry::Seq(Self::encode(value)))
    }

    /// Appends an element.
    pub fn push(&self, value: &V) -> Result<()> {
        let len = self.core.len()?;
        self.insert(len, value)
    }

    /// Overwrites the element at `pos`.
    pub fn set(&self, pos: u64, value: &V) -> Result<()> {
        self.core.set_pos(pos, Entry::Seq(Self::encode(value)))
    }

    /// Removes and returns the element at `pos`.
    pub fn remove(&self, pos: u64) -> Result<V> {
        Self::decode(self.core.remove_pos(pos)?)
    }

    /// Number of elements.
    pub fn len(&self) -> Result<u64> {
        self.core.len()
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Builds the sequence bottom-up from its elements in order.
    pub fn bulk_load(&self, values: Vec<V>) -> Result<()> {
        let entries = values
            .iter()
            .map(|v| Entry::Seq(Self::encode(v)))
            .collect::<Vec<_>>();
        self.core.bulk_load(entries)
    }

    /// Recomputes and checks every structural invariant.
    pub fn verify(&self) -> Result<TreeStats> {
        self.core.verify()
    }
}

/// Bit sequence with rank/select queries.
pub struct BitVector {
    core: TreeCore,
}

impl BitVector {
    /// Creates a new bit-sequence container.
    pub fn create(
        store: Arc<dyn NodeStore>,
        id: ContainerId,
        registry: &Registry,
        opts: TreeOptions,
    ) -> Result<Self> {
        let desc = registry.descriptor(ContainerKind::Bits)?.clone();
        Ok(Self {
            core: TreeCore::create(store, id, desc, opts)?,
        })
    }

    /// Bit at `pos`.
    pub fn get(&self, pos: u64) -> Result<bool> {
        match self.core.entry_at(pos)? {
            Some(Entry::Bit(bit)) => Ok(bit),
            Some(_) => Err(BrambleError::Corruption("bit entry kind mismatch")),
            None => Err(BrambleError::OutOfBounds {
                index: pos,
                len: self.core.len()?,
            }),
        }
    }

    /// Inserts a bit at `pos`, shifting the tail.
    pub fn insert(&self, pos: u64, bit: bool) -> Result<()> {
        self.core.insert_pos(pos, Entry::Bit(bit))
    }

    /// Appends a bit.
    pub fn push(&self, bit: bool) -> Result<()> {
        let len = self.core.len()?;
        self.insert(len, bit)
    }

    /// Overwrites the bit at `pos`.
    pub fn set(&self, pos: u64, bit: bool) -> Result<()> {
        self.core.set_pos(pos, Entry::Bit(bit))
    }

    /// Removes the bit at `pos`.
    pub fn remove(&self, pos: u64) -> Result<bool> {
        match self.core.remove_pos(pos)? {
            Entry::Bit(bit) => Ok(bit),
            _ => Err(BrambleError::Corruption("bit entry kind mismatch")),
        }
    }

    /// Occurrences of `symbol` in positions `[0, pos)`.
    pub fn rank(&self, pos: u64, symbol: bool) -> Result<u64> {
        self.core.rank(pos, symbol)
    }

    /// Position of the `k + 1`-th occurrence of `symbol`, or `None`.
    pub fn select(&self, k: u64, symbol: bool) -> Result<Option<u64>> {
        self.core.select(k, symbol)
    }

    /// Total set bits.
    pub fn count_ones(&self) -> Result<u64> {
        self.core.ones()
    }

    /// Number of bits.
    pub fn len(&self) -> Result<u64> {
        self.core.len()
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Builds the sequence bottom-up from its bits in order.
    pub fn bulk_load(&self, bits: Vec<bool>) -> Result<()> {
        let entries = bits.into_iter().map(Entry::Bit).collect::<Vec<_>>();
        self.core.bulk_load(entries)
    }

    /// Recomputes and checks every structural invariant.
    pub fn verify(&self) -> Result<TreeStats> {
        self.core.verify()
    }
}
