//! Bramble: a balanced-tree storage engine over packed nodes.
//!
//! Trees are built from fixed-capacity, pointer-free node buffers that
//! encode their ordered content directly in serialized form, so nodes can
//! be memory-mapped, relocated and versioned wholesale. A single generic
//! walker drives key search, positional skip and rank/select over the
//! per-node-type packed layouts; every mutation copies the leaf-to-root
//! path and commits a new root atomically, leaving prior snapshots intact.

pub mod codec;
pub mod config;
pub mod containers;
pub mod error;
pub mod node;
pub mod packed;
pub mod registry;
pub mod store;
pub mod tree;
pub mod types;

pub use config::TreeOptions;
pub use error::{BrambleError, Result};
pub use registry::{ContainerKind, Registry};
pub use store::{MemStore, MemStoreOptions, NodeStore, Snapshot};
pub use tree::{TreeCore, TreeStats};
pub use types::{ContainerId, NodeRef, Summary};
