//! Container type registry.
//!
//! A descriptor declares which packed-stream layouts back a container kind
//! and how it treats duplicate keys: the "type tag to behavior" table the
//! node dispatcher consults. The registry is an explicit object built at
//! startup (`Registry::with_defaults`), not a static with implicit
//! initialization order.

use crate::error::{BrambleError, Result};
use crate::node::NodeLayout;

/// The container shapes the engine ships with.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ContainerKind {
    /// Ordered key/value association, unique keys.
    Map,
    /// Ordered key set.
    Set,
    /// Ordered key/value association allowing duplicate keys.
    MultiMap,
    /// Positional sequence of fixed-width elements.
    Sequence,
    /// Bit sequence with rank/select.
    Bits,
}

/// How a container treats an insert whose key is already present.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DuplicatePolicy {
    /// The insert replaces the existing entry's value.
    Reject,
    /// The insert adds another entry after the existing run.
    Allow,
}

/// Static description of one container kind.
#[derive(Clone, Debug)]
pub struct Descriptor {
    /// Human-readable kind name.
    pub name: &'static str,
    /// The container kind.
    pub kind: ContainerKind,
    /// Duplicate-key policy.
    pub duplicates: DuplicatePolicy,
    /// Element width for sequence containers, zero otherwise.
    pub elem_width: u16,
    /// Layout backing this container's leaves.
    pub leaf_layout: NodeLayout,
}

impl Descriptor {
    /// Layout backing this container's branches.
    pub fn branch_layout(&self) -> NodeLayout {
        self.leaf_layout.branch_layout()
    }

    /// Sequence descriptor for a specific element width.
    pub fn sequence(elem_width: u16) -> Self {
        Self {
            name: "sequence",
            kind: ContainerKind::Sequence,
            duplicates: DuplicatePolicy::Allow,
            elem_width,
            leaf_layout: NodeLayout::SeqLeaf,
        }
    }
}

/// Registry of container descriptors.
pub struct Registry {
    entries: Vec<Descriptor>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Registry pre-populated with every built-in kind.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let defaults = [
            Descriptor {
                name: "map",
                kind: ContainerKind::Map,
                duplicates: DuplicatePolicy::Reject,
                elem_width: 0,
                leaf_layout: NodeLayout::KeyedLeaf,
            },
            Descriptor {
                name: "set",
                kind: ContainerKind::Set,
                duplicates: DuplicatePolicy::Reject,
                elem_width: 0,
                leaf_layout: NodeLayout::SetLeaf,
            },
            Descriptor {
                name: "multimap",
                kind: ContainerKind::MultiMap,
                duplicates: DuplicatePolicy::Allow,
                elem_width: 0,
                leaf_layout: NodeLayout::KeyedLeaf,
            },
            Descriptor::sequence(8),
            Descriptor {
                name: "bits",
                kind: ContainerKind::Bits,
                duplicates: DuplicatePolicy::Allow,
                elem_width: 0,
                leaf_layout: NodeLayout::BitsLeaf,
            },
        ];
        for desc in defaults {
            registry.register(desc).expect("defaults are disjoint");
        }
        registry
    }

    /// Registers a descriptor; at most one per kind.
    pub fn register(&mut self, desc: Descriptor) -> Result<()> {
        if self.entries.iter().any(|d| d.kind == desc.kind) {
            return Err(BrambleError::Invalid("container kind already registered"));
        }
        if desc.leaf_layout.branch_layout() == desc.leaf_layout {
            return Err(BrambleError::Invalid("descriptor leaf layout is a branch"));
        }
        self.entries.push(desc);
        Ok(())
    }

    /// Looks up the descriptor for `kind`.
    pub fn descriptor(&self, kind: ContainerKind) -> Result<&Descriptor> {
        self.entries
            .iter()
            .find(|d| d.kind == kind)
            .ok_or(BrambleError::NotFound)
    }

    /// Resolves a persisted node tag to its layout, surfacing
    /// `UnknownNodeType` for damaged bytes.
    pub fn layout_for_tag(&self, tag: u32) -> Result<NodeLayout> {
        NodeLayout::from_tag(tag)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
