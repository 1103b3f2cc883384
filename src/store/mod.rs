//! Store boundary: resolves logical node references to physical buffers.
//!
//! The tree algorithms consume this narrow interface and stay agnostic of
//! where buffers live. Mutations follow a strict protocol: buffers obtained
//! from [`NodeStore::allocate`] or [`NodeStore::copy_on_write`] are private
//! to the mutation until [`NodeStore::publish`], only the final
//! [`NodeStore::commit_root`] is externally observable, and superseded
//! nodes are handed back through [`NodeStore::release`] where they stay
//! readable for any snapshot captured before the commit.

pub mod mem;

pub use mem::{MemStore, MemStoreOptions, StoreStats};

use std::sync::Arc;

use crate::error::Result;
use crate::types::{ContainerId, NodeRef};

/// Immutable handle to a published node buffer.
///
/// Holds the buffer alive independently of store reclamation.
#[derive(Clone)]
pub struct NodeBuffer {
    node: NodeRef,
    data: Arc<[u8]>,
}

impl NodeBuffer {
    /// Builds a handle from its parts.
    pub fn new(node: NodeRef, data: Arc<[u8]>) -> Self {
        Self { node, data }
    }

    /// The reference this buffer was resolved from.
    pub fn node(&self) -> NodeRef {
        self.node
    }

    /// The buffer bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Allocation and persistence seam consumed by the tree core.
pub trait NodeStore: Send + Sync + 'static {
    /// Capacity of every node buffer in bytes.
    fn node_capacity(&self) -> u32;

    /// Reserves a new node identity and hands out its private working
    /// buffer. Fails with `OutOfMemory` when the node budget is exhausted.
    fn allocate(&self) -> Result<(NodeRef, Vec<u8>)>;

    /// Resolves a published node to its buffer.
    fn read(&self, node: NodeRef) -> Result<NodeBuffer>;

    /// Clones `node` into a fresh identity with a private working copy of
    /// its bytes. The source stays untouched.
    fn copy_on_write(&self, node: NodeRef) -> Result<(NodeRef, Vec<u8>)>;

    /// Installs the working buffer for a reserved identity, making it
    /// readable.
    fn publish(&self, node: NodeRef, bytes: Vec<u8>) -> Result<()>;

    /// Abandons a reserved identity whose buffer was never published.
    fn discard(&self, node: NodeRef) -> Result<()>;

    /// Registers a container with its initial root.
    fn create_container(&self, id: ContainerId, root: NodeRef) -> Result<()>;

    /// Removes a container's root binding.
    fn drop_container(&self, id: ContainerId) -> Result<()>;

    /// Current committed root of a container.
    fn root(&self, id: ContainerId) -> Result<NodeRef>;

    /// Atomically swaps a container's root and advances the commit epoch.
    fn commit_root(&self, id: ContainerId, root: NodeRef) -> Result<()>;

    /// Marks a node superseded. Its buffer stays readable for snapshots
    /// pinned before the supersedure and is reclaimed afterwards.
    fn release(&self, node: NodeRef) -> Result<()>;

    /// Pins the current epoch against reclamation; returns the pinned epoch.
    fn pin(&self) -> u64;

    /// Drops a pin obtained from [`NodeStore::pin`].
    fn unpin(&self, epoch: u64);
}

/// A consistent read view of one container: a captured root plus an epoch
/// pin that keeps every node of that tree version readable.
pub struct Snapshot {
    store: Arc<dyn NodeStore>,
    root: NodeRef,
    epoch: u64,
}

impl Snapshot {
    /// Captures the current committed state of `id`.
    pub fn capture(store: Arc<dyn NodeStore>, id: ContainerId) -> Result<Self> {
        let epoch = store.pin();
        match store.root(id) {
            Ok(root) => Ok(Self { store, root, epoch }),
            Err(err) => {
                store.unpin(epoch);
                Err(err)
            }
        }
    }

    /// The captured root reference.
    pub fn root(&self) -> NodeRef {
        self.root
    }

    /// The pinned epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Reads a node of the captured tree version.
    pub fn read(&self, node: NodeRef) -> Result<NodeBuffer> {
        self.store.read(node)
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.store.unpin(self.epoch);
    }
}
