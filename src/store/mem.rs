//! In-memory node store with epoch-based snapshot retention.
//!
//! Nodes live in an arena; a `NodeRef` is `slot index + 1` (zero is the
//! null reference). Superseded nodes are parked on a retired list stamped
//! with the commit epoch at which they stopped being current, and a slot is
//! recycled only once no pinned epoch predates that stamp.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::error::{BrambleError, Result};
use crate::store::{NodeBuffer, NodeStore};
use crate::types::{ContainerId, NodeRef};

/// Construction parameters for [`MemStore`].
#[derive(Debug, Clone)]
pub struct MemStoreOptions {
    /// Capacity of every node buffer.
    pub node_capacity: u32,
    /// Hard cap on simultaneously occupied node slots; exceeding it fails
    /// allocations with `OutOfMemory`.
    pub max_nodes: usize,
}

impl Default for MemStoreOptions {
    fn default() -> Self {
        Self {
            node_capacity: 8192,
            max_nodes: usize::MAX,
        }
    }
}

impl MemStoreOptions {
    /// Options with a small node capacity, handy for forcing splits.
    pub fn with_capacity(node_capacity: u32) -> Self {
        Self {
            node_capacity,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum SlotState {
    Staged,
    Live,
    Retired(u64),
}

struct Slot {
    data: Arc<[u8]>,
    state: SlotState,
}

/// Counters describing the store's current occupancy.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct StoreStats {
    /// Published, current nodes.
    pub live: u64,
    /// Superseded nodes awaiting reclamation.
    pub retired: u64,
    /// Reserved but unpublished nodes.
    pub staged: u64,
    /// Recycled slots available for reuse.
    pub free: u64,
    /// Current commit epoch.
    pub epoch: u64,
}

/// Heap-backed [`NodeStore`] implementation.
pub struct MemStore {
    opts: MemStoreOptions,
    slots: RwLock<Vec<Option<Slot>>>,
    free: Mutex<Vec<usize>>,
    roots: RwLock<HashMap<ContainerId, NodeRef>>,
    epoch: AtomicU64,
    pins: Mutex<BTreeMap<u64, usize>>,
    retired: Mutex<Vec<(u64, NodeRef)>>,
}

impl MemStore {
    /// Creates an empty store.
    pub fn new(opts: MemStoreOptions) -> Self {
        Self {
            opts,
            slots: RwLock::new(Vec::new()),
            free: Mutex::new(Vec::new()),
            roots: RwLock::new(HashMap::new()),
            epoch: AtomicU64::new(1),
            pins: Mutex::new(BTreeMap::new()),
            retired: Mutex::new(Vec::new()),
        }
    }

    fn slot_index(node: NodeRef) -> Result<usize> {
        if node.is_null() {
            return Err(BrambleError::Invalid("null node reference"));
        }
        Ok(node.0 as usize - 1)
    }

    fn occupied(&self) -> usize {
        let slots = self.slots.read();
        let free = self.free.lock();
        slots.len() - free.len()
    }

    /// Occupancy counters.
    pub fn stats(&self) -> StoreStats {
        let slots = self.slots.read();
        let mut stats = StoreStats {
            epoch: self.epoch.load(Ordering::SeqCst),
            ..StoreStats::default()
        };
        for slot in slots.iter() {
            match slot {
                None => stats.free += 1,
                Some(s) => match s.state {
                    SlotState::Staged => stats.staged += 1,
                    SlotState::Live => stats.live += 1,
                    SlotState::Retired(_) => stats.retired += 1,
                },
            }
        }
        stats
    }

    fn try_reclaim(&self) {
        let min_pin = {
            let pins = self.pins.lock();
            pins.keys().next().copied().unwrap_or(u64::MAX)
        };
        let mut reclaimable = Vec::new();
        {
            let mut retired = self.retired.lock();
            retired.retain(|&(stamp, node)| {
                if stamp <= min_pin {
                    reclaimable.push(node);
                    false
                } else {
                    true
                }
            });
        }
        if reclaimable.is_empty() {
            return;
        }
        let mut slots = self.slots.write();
        let mut free = self.free.lock();
        for node in reclaimable {
            let idx = node.0 as usize - 1;
            if slots.get(idx).map_or(false, |s| s.is_some()) {
                slots[idx] = None;
                free.push(idx);
                trace!(node = node.0, "reclaimed retired node");
            }
        }
    }
}

impl NodeStore for MemStore {
    fn node_capacity(&self) -> u32 {
        self.opts.node_capacity
    }

    fn allocate(&self) -> Result<(NodeRef, Vec<u8>)> {
        if self.occupied() >= self.opts.max_nodes {
            return Err(BrambleError::OutOfMemory("node budget exhausted"));
        }
        let placeholder = Slot {
            data: Arc::from(Vec::new().into_boxed_slice()),
            state: SlotState::Staged,
        };
        let idx = {
            let mut slots = self.slots.write();
            let mut free = self.free.lock();
            match free.pop() {
                Some(idx) => {
                    slots[idx] = Some(placeholder);
                    idx
                }
                None => {
                    slots.push(Some(placeholder));
                    slots.len() - 1
                }
            }
        };
        Ok((NodeRef(idx as u64 + 1), vec![0u8; self.opts.node_capacity as usize]))
    }

    fn read(&self, node: NodeRef) -> Result<NodeBuffer> {
        let idx = Self::slot_index(node)?;
        let slots = self.slots.read();
        let slot = slots
            .get(idx)
            .and_then(|s| s.as_ref())
            .ok_or(BrambleError::Corruption("dangling node reference"))?;
        if slot.state == SlotState::Staged {
            return Err(BrambleError::Invalid("read of unpublished node"));
        }
        Ok(NodeBuffer::new(node, Arc::clone(&slot.data)))
    }

    fn copy_on_write(&self, node: NodeRef) -> Result<(NodeRef, Vec<u8>)> {
        let source = self.read(node)?;
        let (fresh, mut buf) = self.allocate()?;
        buf.copy_from_slice(source.data());
        Ok((fresh, buf))
    }

    fn publish(&self, node: NodeRef, bytes: Vec<u8>) -> Result<()> {
        if bytes.len() != self.opts.node_capacity as usize {
            return Err(BrambleError::Invalid("published buffer has wrong capacity"));
        }
        let idx = Self::slot_index(node)?;
        let mut slots = self.slots.write();
        let slot = slots
            .get_mut(idx)
            .and_then(|s| s.as_mut())
            .ok_or(BrambleError::Corruption("dangling node reference"))?;
        if slot.state != SlotState::Staged {
            return Err(BrambleError::Invalid("publish of non-staged node"));
        }
        slot.data = Arc::from(bytes.into_boxed_slice());
        slot.state = SlotState::Live;
        Ok(())
    }

    fn discard(&self, node: NodeRef) -> Result<()> {
        let idx = Self::slot_index(node)?;
        let mut slots = self.slots.write();
        match slots.get_mut(idx) {
            Some(entry @ Some(_)) => {
                if entry.as_ref().map(|s| s.state) != Some(SlotState::Staged) {
                    return Err(BrambleError::Invalid("discard of published node"));
                }
                *entry = None;
            }
            _ => return Err(BrambleError::Corruption("dangling node reference")),
        }
        drop(slots);
        self.free.lock().push(idx);
        Ok(())
    }

    fn create_container(&self, id: ContainerId, root: NodeRef) -> Result<()> {
        let mut roots = self.roots.write();
        if roots.contains_key(&id) {
            return Err(BrambleError::Invalid("container already exists"));
        }
        roots.insert(id, root);
        debug!(container = id.0, root = root.0, "container created");
        Ok(())
    }

    fn drop_container(&self, id: ContainerId) -> Result<()> {
        let removed = self.roots.write().remove(&id);
        if removed.is_none() {
            return Err(BrambleError::NotFound);
        }
        Ok(())
    }

    fn root(&self, id: ContainerId) -> Result<NodeRef> {
        self.roots.read().get(&id).copied().ok_or(BrambleError::NotFound)
    }

    fn commit_root(&self, id: ContainerId, root: NodeRef) -> Result<()> {
        {
            let mut roots = self.roots.write();
            let slot = roots.get_mut(&id).ok_or(BrambleError::NotFound)?;
            *slot = root;
        }
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(container = id.0, root = root.0, epoch, "root committed");
        Ok(())
    }

    fn release(&self, node: NodeRef) -> Result<()> {
        let idx = Self::slot_index(node)?;
        let stamp = self.epoch.load(Ordering::SeqCst);
        {
            let mut slots = self.slots.write();
            let slot = slots
                .get_mut(idx)
                .and_then(|s| s.as_mut())
                .ok_or(BrambleError::Corruption("dangling node reference"))?;
            if slot.state != SlotState::Live {
                return Err(BrambleError::Invalid("release of non-live node"));
            }
            slot.state = SlotState::Retired(stamp);
        }
        self.retired.lock().push((stamp, node));
        self.try_reclaim();
        Ok(())
    }

    fn pin(&self) -> u64 {
        let mut pins = self.pins.lock();
        let epoch = self.epoch.load(Ordering::SeqCst);
        *pins.entry(epoch).or_insert(0) += 1;
        epoch
    }

    fn unpin(&self, epoch: u64) {
        {
            let mut pins = self.pins.lock();
            if let Some(count) = pins.get_mut(&epoch) {
                *count -= 1;
                if *count == 0 {
                    pins.remove(&epoch);
                }
            }
        }
        self.try_reclaim();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemStore {
        MemStore::new(MemStoreOptions {
            node_capacity: 64,
            max_nodes: usize::MAX,
        })
    }

    #[test]
    fn allocate_publish_read_roundtrip() -> Result<()> {
        let store = store();
        let (node, mut buf) = store.allocate()?;
        buf[0] = 0xAB;
        store.publish(node, buf)?;
        let read = store.read(node)?;
        assert_eq!(read.data()[0], 0xAB);
        assert_eq!(read.node(), node);
        Ok(())
    }

    #[test]
    fn staged_nodes_are_not_readable() -> Result<()> {
        let store = store();
        let (node, _buf) = store.allocate()?;
        assert!(store.read(node).is_err());
        store.discard(node)?;
        assert!(store.read(node).is_err());
        Ok(())
    }

    #[test]
    fn copy_on_write_leaves_source_untouched() -> Result<()> {
        let store = store();
        let (node, mut buf) = store.allocate()?;
        buf[0] = 1;
        store.publish(node, buf)?;
        let (fresh, mut copy) = store.copy_on_write(node)?;
        assert_ne!(fresh, node);
        assert_eq!(copy[0], 1);
        copy[0] = 2;
        store.publish(fresh, copy)?;
        assert_eq!(store.read(node)?.data()[0], 1);
        assert_eq!(store.read(fresh)?.data()[0], 2);
        Ok(())
    }

    #[test]
    fn node_budget_exhaustion_is_out_of_memory() -> Result<()> {
        let store = MemStore::new(MemStoreOptions {
            node_capacity: 64,
            max_nodes: 2,
        });
        let (a, buf) = store.allocate()?;
        store.publish(a, buf)?;
        let (_b, _buf) = store.allocate()?;
        let err = store.allocate().unwrap_err();
        assert!(matches!(err, BrambleError::OutOfMemory(_)));
        Ok(())
    }

    #[test]
    fn release_without_pins_reclaims_immediately() -> Result<()> {
        let store = store();
        let (node, buf) = store.allocate()?;
        store.publish(node, buf)?;
        store.release(node)?;
        assert_eq!(store.stats().retired, 0);
        assert_eq!(store.stats().free, 1);
        Ok(())
    }

    #[test]
    fn pinned_epoch_defers_reclamation() -> Result<()> {
        let store = store();
        store.create_container(ContainerId(1), NodeRef(1))?;
        let (node, buf) = store.allocate()?;
        store.publish(node, buf)?;

        let pin = store.pin();
        // A later commit supersedes the node while the pin is held.
        store.commit_root(ContainerId(1), node)?;
        store.release(node)?;
        assert_eq!(store.stats().retired, 1, "pinned reader keeps the buffer");
        assert!(store.read(node).is_ok(), "retired node stays readable");

        store.unpin(pin);
        assert_eq!(store.stats().retired, 0, "unpin allows reclamation");
        Ok(())
    }

    #[test]
    fn commit_root_swaps_and_bumps_epoch() -> Result<()> {
        let store = store();
        store.create_container(ContainerId(9), NodeRef(5))?;
        let before = store.stats().epoch;
        store.commit_root(ContainerId(9), NodeRef(6))?;
        assert_eq!(store.root(ContainerId(9))?, NodeRef(6));
        assert_eq!(store.stats().epoch, before + 1);
        Ok(())
    }
}
