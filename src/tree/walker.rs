//! Generic root-to-leaf traversal driven by a pluggable step policy.
//!
//! One walker skeleton serves key search, positional skip and rank/select:
//! the policy picks the child to descend into at each branch and resolves
//! the final in-leaf offset, while the walker records the descent path and
//! accumulates the element and set-bit counts preceding the reached leaf.
//! A miss is a terminal outcome, not an error; it carries the position an
//! insert would use.

use smallvec::SmallVec;

use crate::error::Result;
use crate::node::NodeView;
use crate::store::Snapshot;
use crate::types::NodeRef;

/// One recorded descent step: a branch node and the child index taken.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PathStep {
    /// The branch node.
    pub node: NodeRef,
    /// The child offset descended into.
    pub child: usize,
}

/// Root-to-parent-of-leaf descent path.
pub type WalkPath = SmallVec<[PathStep; 8]>;

/// Where a walk ended up.
#[derive(Clone, Debug)]
pub struct WalkOutcome {
    /// Branch steps from the root down to the leaf's parent.
    pub path: WalkPath,
    /// The reached leaf.
    pub leaf: NodeRef,
    /// Offset within the leaf: the hit, or the would-insert position.
    pub offset: usize,
    /// Whether the target was found.
    pub found: bool,
    /// Elements stored in leaves preceding the reached leaf.
    pub leaf_base: u64,
    /// Set bits in leaves preceding the reached leaf (bit sequences).
    pub ones_base: u64,
}

impl WalkOutcome {
    /// Absolute ordinal position of the reached offset.
    pub fn position(&self) -> u64 {
        self.leaf_base + self.offset as u64
    }
}

/// Per-node decisions parameterizing [`walk`].
pub trait StepPolicy {
    /// Child offset to descend into at a branch.
    fn branch(&mut self, view: &NodeView<'_>) -> Result<usize>;

    /// Final `(offset, found)` resolution at the leaf.
    fn leaf(&mut self, view: &NodeView<'_>) -> Result<(usize, bool)>;
}

/// Descends from the snapshot root to a leaf under `policy`.
pub fn walk<P: StepPolicy>(snapshot: &Snapshot, policy: &mut P) -> Result<WalkOutcome> {
    let mut node = snapshot.root();
    let mut path = WalkPath::new();
    let mut leaf_base: u64 = 0;
    let mut ones_base: u64 = 0;
    loop {
        let buffer = snapshot.read(node)?;
        let view = NodeView::parse(buffer.data())?;
        if view.is_leaf() {
            let (offset, found) = policy.leaf(&view)?;
            return Ok(WalkOutcome {
                path,
                leaf: node,
                offset,
                found,
                leaf_base,
                ones_base,
            });
        }
        let child = policy.branch(&view)?;
        leaf_base += view.count_prefix(child)?;
        if view.layout().tracks_ones() {
            ones_base += view.ones_prefix(child)?;
        }
        path.push(PathStep { node, child });
        node = view.child_ref(child)?;
    }
}

/// Key search: leftmost (or, for `upper`, first-past-the-run) position for
/// an encoded key.
pub struct KeySearch<'k> {
    key: &'k [u8],
    upper: bool,
}

impl<'k> KeySearch<'k> {
    /// Lower-bound search: leftmost position with an equal-or-greater key.
    pub fn lower(key: &'k [u8]) -> Self {
        Self { key, upper: false }
    }

    /// Upper-bound search: first position past the run of equal keys, used
    /// to keep duplicate inserts in arrival order.
    pub fn upper(key: &'k [u8]) -> Self {
        Self { key, upper: true }
    }
}

impl StepPolicy for KeySearch<'_> {
    fn branch(&mut self, view: &NodeView<'_>) -> Result<usize> {
        if !self.upper {
            return view.search_separators(self.key);
        }
        // Separators are subtree max keys: for the upper bound, skip every
        // child whose max does not exceed the key.
        let n = view.entries()?;
        let mut lo = 0usize;
        let mut hi = n;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if view.separator(mid)? <= self.key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo.min(n.saturating_sub(1)))
    }

    fn leaf(&mut self, view: &NodeView<'_>) -> Result<(usize, bool)> {
        if !self.upper {
            return view.lower_bound(self.key);
        }
        let n = view.entries()?;
        let mut lo = 0usize;
        let mut hi = n;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if view.key_at(mid)? <= self.key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok((lo, false))
    }
}

/// Positional skip: descends by cumulative element counts to ordinal
/// position `n`. Past-end targets resolve to the end of the last leaf with
/// `found == false`.
pub struct Skip {
    remaining: u64,
}

impl Skip {
    /// Policy targeting ordinal position `n`.
    pub fn new(n: u64) -> Self {
        Self { remaining: n }
    }
}

impl StepPolicy for Skip {
    fn branch(&mut self, view: &NodeView<'_>) -> Result<usize> {
        match view.locate_count(self.remaining)? {
            Some((child, before)) => {
                self.remaining -= before;
                Ok(child)
            }
            None => {
                let n = view.entries()?;
                if n == 0 {
                    return Err(crate::error::BrambleError::Corruption("branch without children"));
                }
                let last = n - 1;
                self.remaining -= view.count_prefix(last)?;
                Ok(last)
            }
        }
    }

    fn leaf(&mut self, view: &NodeView<'_>) -> Result<(usize, bool)> {
        let n = view.entries()?;
        if self.remaining < n as u64 {
            Ok((self.remaining as usize, true))
        } else {
            Ok((n, false))
        }
    }
}

/// Select walk: descends by cumulative symbol counts to the `k + 1`-th
/// occurrence of `symbol` in a bit-sequence tree.
pub struct SelectWalk {
    symbol: bool,
    remaining: u64,
}

impl SelectWalk {
    /// Policy targeting the `k + 1`-th occurrence of `symbol`.
    pub fn new(k: u64, symbol: bool) -> Self {
        Self { symbol, remaining: k }
    }
}

impl StepPolicy for SelectWalk {
    fn branch(&mut self, view: &NodeView<'_>) -> Result<usize> {
        match view.locate_symbol(self.remaining, self.symbol)? {
            Some((child, before)) => {
                self.remaining -= before;
                Ok(child)
            }
            None => {
                let n = view.entries()?;
                if n == 0 {
                    return Err(crate::error::BrambleError::Corruption("branch without children"));
                }
                let last = n - 1;
                let before = if self.symbol {
                    view.ones_prefix(last)?
                } else {
                    view.count_prefix(last)? - view.ones_prefix(last)?
                };
                self.remaining -= before;
                Ok(last)
            }
        }
    }

    fn leaf(&mut self, view: &NodeView<'_>) -> Result<(usize, bool)> {
        let bits = view.bits()?;
        match bits.select(self.remaining, self.symbol)? {
            Some(pos) => Ok((pos as usize, true)),
            None => Ok((bits.size(), false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{self, NodeLayout, NodeViewMut};
    use crate::store::{MemStore, MemStoreOptions, NodeStore, Snapshot};
    use crate::types::{ContainerId, Summary};
    use std::sync::Arc;

    /// Builds a two-level keyed tree by hand: leaves [a, b] and [c, d].
    fn two_level_tree() -> Result<(Arc<dyn NodeStore>, Snapshot)> {
        let store: Arc<dyn NodeStore> = Arc::new(MemStore::new(MemStoreOptions::with_capacity(512)));
        let mut leaves = Vec::new();
        for chunk in [&[(b"a", b"1"), (b"b", b"2")][..], &[(b"c", b"3"), (b"d", b"4")][..]] {
            let (node_ref, mut buf) = store.allocate()?;
            node::init_leaf(&mut buf, NodeLayout::KeyedLeaf, 0)?;
            {
                let mut node = NodeViewMut::parse(&mut buf)?;
                for (i, (k, v)) in chunk.iter().enumerate() {
                    node.keyed_insert(i, *k, *v)?;
                }
            }
            store.publish(node_ref, buf)?;
            leaves.push(node_ref);
        }
        let (root, mut buf) = store.allocate()?;
        node::init_branch(&mut buf, NodeLayout::KeyedBranch, 1)?;
        {
            let mut node = NodeViewMut::parse(&mut buf)?;
            node.branch_insert(0, Some(b"b".as_slice()), leaves[0], Summary::of_count(2))?;
            node.branch_insert(1, Some(b"d".as_slice()), leaves[1], Summary::of_count(2))?;
        }
        store.publish(root, buf)?;
        store.create_container(ContainerId(1), root)?;
        let snap = Snapshot::capture(Arc::clone(&store), ContainerId(1))?;
        Ok((store, snap))
    }

    #[test]
    fn key_search_descends_to_the_right_leaf() -> Result<()> {
        let (_store, snap) = two_level_tree()?;
        let hit = walk(&snap, &mut KeySearch::lower(b"c"))?;
        assert!(hit.found);
        assert_eq!(hit.offset, 0);
        assert_eq!(hit.leaf_base, 2);
        assert_eq!(hit.position(), 2);
        assert_eq!(hit.path.len(), 1);
        assert_eq!(hit.path[0].child, 1);

        let miss = walk(&snap, &mut KeySearch::lower(b"bb"))?;
        assert!(!miss.found);
        // "bb" sorts after "b": would insert at the front of the second leaf.
        assert_eq!(miss.position(), 2);

        let past = walk(&snap, &mut KeySearch::lower(b"zz"))?;
        assert!(!past.found);
        assert_eq!(past.position(), 4);
        Ok(())
    }

    #[test]
    fn skip_reaches_ordinal_positions() -> Result<()> {
        let (_store, snap) = two_level_tree()?;
        for (pos, expect_leaf_child, expect_offset) in
            [(0u64, 0usize, 0usize), (1, 0, 1), (2, 1, 0), (3, 1, 1)]
        {
            let out = walk(&snap, &mut Skip::new(pos))?;
            assert!(out.found, "position {pos}");
            assert_eq!(out.path[0].child, expect_leaf_child);
            assert_eq!(out.offset, expect_offset);
            assert_eq!(out.position(), pos);
        }
        let past = walk(&snap, &mut Skip::new(4))?;
        assert!(!past.found);
        assert_eq!(past.position(), 4);
        Ok(())
    }
}
