//! Cursors: leaf-anchored positions supporting bidirectional iteration.
//!
//! A cursor pins the snapshot it was created from, so the leaf it points at
//! can never be replaced under it; repositioning against a newer committed
//! root is an explicit re-seek through the owning container. Crossing a
//! leaf boundary reuses the retained ancestor path to reach the adjacent
//! leaf instead of re-descending from the root.

use smallvec::SmallVec;

use crate::error::{BrambleError, Result};
use crate::node::{Entry, NodeView};
use crate::store::Snapshot;
use crate::tree::walker::{PathStep, WalkOutcome};
use crate::types::NodeRef;

/// A position within one captured tree version.
pub struct Cursor {
    snap: Snapshot,
    path: SmallVec<[PathStep; 8]>,
    leaf: NodeRef,
    offset: usize,
    leaf_entries: usize,
    position: u64,
}

impl Cursor {
    /// Builds a cursor from a walk outcome, taking ownership of the
    /// snapshot that produced it.
    pub(crate) fn from_walk(snap: Snapshot, out: &WalkOutcome) -> Result<Self> {
        let leaf_buf = snap.read(out.leaf)?;
        let leaf_entries = NodeView::parse(leaf_buf.data())?.entries()?;
        Ok(Self {
            snap,
            path: out.path.clone(),
            leaf: out.leaf,
            offset: out.offset,
            leaf_entries,
            position: out.position(),
        })
    }

    /// Absolute ordinal position of the cursor.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether the cursor points at an element (not past-end).
    pub fn is_valid(&self) -> bool {
        self.offset < self.leaf_entries
    }

    /// The snapshot this cursor iterates over.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snap
    }

    /// The entry under the cursor.
    pub fn entry(&self) -> Result<Entry> {
        if !self.is_valid() {
            return Err(BrambleError::OutOfBounds {
                index: self.offset as u64,
                len: self.leaf_entries as u64,
            });
        }
        let buf = self.snap.read(self.leaf)?;
        NodeView::parse(buf.data())?.entry(self.offset)
    }

    /// Key bytes under the cursor (keyed containers).
    pub fn key(&self) -> Result<Vec<u8>> {
        if !self.is_valid() {
            return Err(BrambleError::OutOfBounds {
                index: self.offset as u64,
                len: self.leaf_entries as u64,
            });
        }
        let buf = self.snap.read(self.leaf)?;
        Ok(NodeView::parse(buf.data())?.key_at(self.offset)?.to_vec())
    }

    /// Value bytes under the cursor (keyed containers).
    pub fn value(&self) -> Result<Vec<u8>> {
        if !self.is_valid() {
            return Err(BrambleError::OutOfBounds {
                index: self.offset as u64,
                len: self.leaf_entries as u64,
            });
        }
        let buf = self.snap.read(self.leaf)?;
        Ok(NodeView::parse(buf.data())?.value_at(self.offset)?.to_vec())
    }

    fn move_to_leaf_edge(&mut self, mut node: NodeRef, front: bool) -> Result<()> {
        loop {
            let buf = self.snap.read(node)?;
            let view = NodeView::parse(buf.data())?;
            if view.is_leaf() {
                self.leaf = node;
                self.leaf_entries = view.entries()?;
                self.offset = if front {
                    0
                } else {
                    self.leaf_entries.saturating_sub(1)
                };
                return Ok(());
            }
            let n = view.entries()?;
            if n == 0 {
                return Err(BrambleError::Corruption("branch without children"));
            }
            let child = if front { 0 } else { n - 1 };
            self.path.push(PathStep { node, child });
            node = view.child_ref(child)?;
        }
    }

    /// Steps forward. Returns `false` once the cursor passes the last
    /// element, leaving it in the past-end state.
    pub fn advance(&mut self) -> Result<bool> {
        if self.offset >= self.leaf_entries {
            return Ok(false);
        }
        if self.offset + 1 < self.leaf_entries {
            self.offset += 1;
            self.position += 1;
            return Ok(true);
        }
        // Last element of this leaf: climb to the nearest ancestor with a
        // following child, then descend its leftmost spine.
        let mut depth = self.path.len();
        while depth > 0 {
            depth -= 1;
            let step = self.path[depth];
            let buf = self.snap.read(step.node)?;
            let view = NodeView::parse(buf.data())?;
            if step.child + 1 < view.entries()? {
                let next = view.child_ref(step.child + 1)?;
                self.path.truncate(depth);
                self.path.push(PathStep {
                    node: step.node,
                    child: step.child + 1,
                });
                self.move_to_leaf_edge(next, true)?;
                self.position += 1;
                return Ok(true);
            }
        }
        self.offset = self.leaf_entries;
        self.position += 1;
        Ok(false)
    }

    /// Steps backward. Returns `false` at the first element.
    pub fn retreat(&mut self) -> Result<bool> {
        if self.offset > 0 {
            self.offset -= 1;
            self.position -= 1;
            return Ok(true);
        }
        let mut depth = self.path.len();
        while depth > 0 {
            depth -= 1;
            let step = self.path[depth];
            let buf = self.snap.read(step.node)?;
            let view = NodeView::parse(buf.data())?;
            if step.child > 0 {
                let prev = view.child_ref(step.child - 1)?;
                self.path.truncate(depth);
                self.path.push(PathStep {
                    node: step.node,
                    child: step.child - 1,
                });
                self.move_to_leaf_edge(prev, false)?;
                self.position -= 1;
                return Ok(true);
            }
        }
        Ok(false)
    }
}
