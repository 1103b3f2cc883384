use std::fmt;

/// Logical reference to a node buffer, resolved through the store.
///
/// A `NodeRef` is an arena slot index, not an address. Copy-on-write rebinds
/// a tree position to a new `NodeRef` while prior readers keep resolving the
/// old one.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeRef(pub u64);

impl NodeRef {
    /// The reserved null reference.
    pub const NULL: NodeRef = NodeRef(0);

    /// Returns `true` when this is the null reference.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Identifier of one container (tree instance) within a store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ContainerId(pub u32);

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Aggregate describing one subtree, cached in its parent branch entry.
///
/// `count` is the number of leaf elements below the child; `ones` is the
/// number of set bits and is only maintained for bit-sequence containers.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct Summary {
    /// Leaf elements in the subtree.
    pub count: u64,
    /// Set bits in the subtree (bit sequences only, zero otherwise).
    pub ones: u64,
}

impl Summary {
    /// Builds a summary with the given element count and no set bits.
    pub const fn of_count(count: u64) -> Self {
        Self { count, ones: 0 }
    }

    /// Checked component-wise addition.
    pub fn checked_add(self, other: Summary) -> Option<Summary> {
        Some(Summary {
            count: self.count.checked_add(other.count)?,
            ones: self.ones.checked_add(other.ones)?,
        })
    }
}
