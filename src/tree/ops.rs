//! Whole-tree operations: copy-on-write mutation, split, merge,
//! redistribution, bulk loading and invariant verification.
//!
//! Every mutation stages fresh node buffers privately, rewrites the
//! leaf-to-root path, and becomes visible only through the final root
//! commit. On any failure the staged nodes are released and the previously
//! committed root remains authoritative.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::TreeOptions;
use crate::error::{BrambleError, Result};
use crate::node::{self, Entry, NodeLayout, NodeView, NodeViewMut};
use crate::registry::{Descriptor, DuplicatePolicy};
use crate::store::{NodeStore, Snapshot};
use crate::tree::walker::{self, KeySearch, PathStep, SelectWalk, Skip, WalkOutcome};
use crate::types::{ContainerId, NodeRef, Summary};

/// Aggregate facts reported by [`TreeCore::verify`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TreeStats {
    /// Number of levels, leaves included.
    pub height: usize,
    /// Total nodes in the tree.
    pub nodes: u64,
    /// Total leaf elements.
    pub entries: u64,
}

/// New version of one child produced by a mutation step.
#[derive(Clone, Debug)]
struct ChildInfo {
    node: NodeRef,
    summary: Summary,
    max_key: Option<Vec<u8>>,
}

fn info_of(buf: &[u8], node: NodeRef) -> Result<ChildInfo> {
    let view = NodeView::parse(buf)?;
    Ok(ChildInfo {
        node,
        summary: view.summary()?,
        max_key: view.max_key()?,
    })
}

/// Changes one level of the copy path hands to the level above.
#[derive(Clone, Debug)]
struct Patch {
    /// Index of the rewritten child; `None` means the recorded path offset.
    primary_at: Option<usize>,
    /// The rewritten child.
    replace: ChildInfo,
    /// Redistribution partner update, absolute index in the parent.
    second: Option<(usize, ChildInfo)>,
    /// Child entry deleted by a merge, absolute index in the parent.
    remove_at: Option<usize>,
    /// Split product inserted right of the rewritten child.
    insert_right: Option<ChildInfo>,
}

impl Patch {
    fn replace_only(replace: ChildInfo) -> Self {
        Self {
            primary_at: None,
            replace,
            second: None,
            remove_at: None,
            insert_right: None,
        }
    }
}

/// Pending edit applied to the target leaf.
enum LeafEdit {
    Insert(usize, Entry),
    SetValue(usize, Vec<u8>),
    SetElem(usize, Vec<u8>),
    SetBit(usize, bool),
    Remove(usize),
}

impl LeafEdit {
    fn shrinks(&self) -> bool {
        matches!(self, LeafEdit::Remove(_))
    }
}

/// Bookkeeping for one atomic structural mutation.
struct Mutation<'a> {
    store: &'a Arc<dyn NodeStore>,
    fresh: Vec<NodeRef>,
    obsolete: Vec<NodeRef>,
}

impl<'a> Mutation<'a> {
    fn new(store: &'a Arc<dyn NodeStore>) -> Self {
        Self {
            store,
            fresh: Vec::new(),
            obsolete: Vec::new(),
        }
    }

    fn publish(&mut self, node: NodeRef, buf: Vec<u8>) -> Result<()> {
        self.store.publish(node, buf)?;
        self.fresh.push(node);
        Ok(())
    }

    fn commit(self, id: ContainerId, new_root: NodeRef) -> Result<()> {
        self.store.commit_root(id, new_root)?;
        for old in self.obsolete {
            self.store.release(old)?;
        }
        Ok(())
    }

    fn abort(self) {
        for node in self.fresh {
            let _ = self.store.release(node);
        }
    }
}

/// Generic tree engine: one container instance bound to a store.
#[derive(Clone)]
pub struct TreeCore {
    store: Arc<dyn NodeStore>,
    id: ContainerId,
    desc: Descriptor,
    opts: TreeOptions,
}

impl TreeCore {
    /// Creates a new container with an empty leaf root.
    pub fn create(
        store: Arc<dyn NodeStore>,
        id: ContainerId,
        desc: Descriptor,
        opts: TreeOptions,
    ) -> Result<Self> {
        validate_options(&opts)?;
        let (root, mut buf) = store.allocate()?;
        if let Err(err) = node::init_leaf(&mut buf, desc.leaf_layout, desc.elem_width) {
            let _ = store.discard(root);
            return Err(err);
        }
        store.publish(root, buf)?;
        store.create_container(id, root)?;
        debug!(container = id.0, "tree created");
        Ok(Self { store, id, desc, opts })
    }

    /// Binds to an existing container.
    pub fn open(
        store: Arc<dyn NodeStore>,
        id: ContainerId,
        desc: Descriptor,
        opts: TreeOptions,
    ) -> Result<Self> {
        validate_options(&opts)?;
        store.root(id)?;
        Ok(Self { store, id, desc, opts })
    }

    /// The container identifier.
    pub fn id(&self) -> ContainerId {
        self.id
    }

    /// The container descriptor.
    pub fn descriptor(&self) -> &Descriptor {
        &self.desc
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    /// Captures a consistent read view of the current committed state.
    pub fn snapshot(&self) -> Result<Snapshot> {
        Snapshot::capture(Arc::clone(&self.store), self.id)
    }

    /// Total element count.
    pub fn len(&self) -> Result<u64> {
        let snap = self.snapshot()?;
        self.len_in(&snap)
    }

    /// Total element count of a captured snapshot.
    pub fn len_in(&self, snap: &Snapshot) -> Result<u64> {
        let root = snap.read(snap.root())?;
        Ok(NodeView::parse(root.data())?.summary()?.count)
    }

    /// Total set bits (bit sequences).
    pub fn ones(&self) -> Result<u64> {
        let snap = self.snapshot()?;
        let root = snap.read(snap.root())?;
        Ok(NodeView::parse(root.data())?.summary()?.ones)
    }

    /// Looks up a key in the current committed state.
    pub fn lookup_key(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let snap = self.snapshot()?;
        self.lookup_key_in(&snap, key)
    }

    /// Looks up a key in a captured snapshot.
    pub fn lookup_key_in(&self, snap: &Snapshot, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let out = walker::walk(snap, &mut KeySearch::lower(key))?;
        if !out.found {
            return Ok(None);
        }
        let leaf = snap.read(out.leaf)?;
        let view = NodeView::parse(leaf.data())?;
        Ok(Some(view.value_at(out.offset)?.to_vec()))
    }

    /// Positions a walk at a key; exposed for cursor seeding.
    pub fn walk_key(&self, snap: &Snapshot, key: &[u8]) -> Result<WalkOutcome> {
        walker::walk(snap, &mut KeySearch::lower(key))
    }

    /// Positions a walk at an ordinal position; exposed for cursor seeding.
    pub fn walk_pos(&self, snap: &Snapshot, pos: u64) -> Result<WalkOutcome> {
        walker::walk(snap, &mut Skip::new(pos))
    }

    /// Reads the entry at an ordinal position.
    pub fn entry_at(&self, pos: u64) -> Result<Option<Entry>> {
        let snap = self.snapshot()?;
        self.entry_at_in(&snap, pos)
    }

    /// Reads the entry at an ordinal position in a captured snapshot.
    pub fn entry_at_in(&self, snap: &Snapshot, pos: u64) -> Result<Option<Entry>> {
        let out = walker::walk(snap, &mut Skip::new(pos))?;
        if !out.found {
            return Ok(None);
        }
        let leaf = snap.read(out.leaf)?;
        NodeView::parse(leaf.data())?.entry(out.offset).map(Some)
    }

    /// Occurrences of `symbol` in positions `[0, pos)` of a bit sequence.
    pub fn rank(&self, pos: u64, symbol: bool) -> Result<u64> {
        let snap = self.snapshot()?;
        let len = self.len_in(&snap)?;
        if pos > len {
            return Err(BrambleError::OutOfBounds { index: pos, len });
        }
        let out = walker::walk(&snap, &mut Skip::new(pos))?;
        let leaf = snap.read(out.leaf)?;
        let bits = NodeView::parse(leaf.data())?.bits()?;
        let in_leaf = bits.rank(out.offset, symbol)?;
        Ok(if symbol {
            out.ones_base + in_leaf
        } else {
            (out.leaf_base - out.ones_base) + in_leaf
        })
    }

    /// Position of the `k + 1`-th occurrence of `symbol`, or `None`.
    pub fn select(&self, k: u64, symbol: bool) -> Result<Option<u64>> {
        let snap = self.snapshot()?;
        let out = walker::walk(&snap, &mut SelectWalk::new(k, symbol))?;
        if !out.found {
            return Ok(None);
        }
        Ok(Some(out.position()))
    }

    /// Keyed insert honoring the duplicate policy.
    ///
    /// Returns the previous value when an existing entry was replaced.
    pub fn insert_key(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        let snap = self.snapshot()?;
        match self.desc.duplicates {
            DuplicatePolicy::Reject => {
                let out = walker::walk(&snap, &mut KeySearch::lower(key))?;
                if out.found {
                    if self.desc.leaf_layout == NodeLayout::SetLeaf {
                        return Ok(Some(Vec::new()));
                    }
                    let leaf = snap.read(out.leaf)?;
                    let old = NodeView::parse(leaf.data())?.value_at(out.offset)?.to_vec();
                    self.apply_edit(&snap, &out, LeafEdit::SetValue(out.offset, value.to_vec()))?;
                    Ok(Some(old))
                } else {
                    let entry = Entry::Keyed {
                        key: key.to_vec(),
                        value: value.to_vec(),
                    };
                    self.apply_edit(&snap, &out, LeafEdit::Insert(out.offset, entry))?;
                    Ok(None)
                }
            }
            DuplicatePolicy::Allow => {
                let out = walker::walk(&snap, &mut KeySearch::upper(key))?;
                let entry = Entry::Keyed {
                    key: key.to_vec(),
                    value: value.to_vec(),
                };
                self.apply_edit(&snap, &out, LeafEdit::Insert(out.offset, entry))?;
                Ok(None)
            }
        }
    }

    /// Removes the leftmost entry matching `key`.
    ///
    /// Removing an absent key is a no-op returning `None`.
    pub fn remove_key(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let snap = self.snapshot()?;
        let out = walker::walk(&snap, &mut KeySearch::lower(key))?;
        if !out.found {
            return Ok(None);
        }
        let leaf = snap.read(out.leaf)?;
        let old = NodeView::parse(leaf.data())?.value_at(out.offset)?.to_vec();
        self.apply_edit(&snap, &out, LeafEdit::Remove(out.offset))?;
        Ok(Some(old))
    }

    /// Inserts an entry at an ordinal position (sequence and bit trees).
    pub fn insert_pos(&self, pos: u64, entry: Entry) -> Result<()> {
        let snap = self.snapshot()?;
        let len = self.len_in(&snap)?;
        if pos > len {
            return Err(BrambleError::OutOfBounds { index: pos, len });
        }
        let out = walker::walk(&snap, &mut Skip::new(pos))?;
        self.apply_edit(&snap, &out, LeafEdit::Insert(out.offset, entry))
    }

    /// Overwrites the entry at an ordinal position.
    pub fn set_pos(&self, pos: u64, entry: Entry) -> Result<()> {
        let snap = self.snapshot()?;
        let len = self.len_in(&snap)?;
        if pos >= len {
            return Err(BrambleError::OutOfBounds { index: pos, len });
        }
        let out = walker::walk(&snap, &mut Skip::new(pos))?;
        let edit = match entry {
            Entry::Bit(bit) => LeafEdit::SetBit(out.offset, bit),
            Entry::Seq(elem) => LeafEdit::SetElem(out.offset, elem),
            _ => return Err(BrambleError::Invalid("entry kind does not match container")),
        };
        self.apply_edit(&snap, &out, edit)
    }

    /// Removes and returns the entry at an ordinal position.
    pub fn remove_pos(&self, pos: u64) -> Result<Entry> {
        let snap = self.snapshot()?;
        let len = self.len_in(&snap)?;
        if pos >= len {
            return Err(BrambleError::OutOfBounds { index: pos, len });
        }
        let out = walker::walk(&snap, &mut Skip::new(pos))?;
        let leaf = snap.read(out.leaf)?;
        let removed = NodeView::parse(leaf.data())?.entry(out.offset)?;
        self.apply_edit(&snap, &out, LeafEdit::Remove(out.offset))?;
        Ok(removed)
    }

    /// Releases every node of the tree and drops the container binding.
    pub fn destroy(self) -> Result<()> {
        let snap = self.snapshot()?;
        self.release_subtree(&snap, snap.root())?;
        drop(snap);
        self.store.drop_container(self.id)
    }

    fn release_subtree(&self, snap: &Snapshot, node: NodeRef) -> Result<()> {
        let buf = snap.read(node)?;
        let view = NodeView::parse(buf.data())?;
        if !view.is_leaf() {
            for i in 0..view.entries()? {
                self.release_subtree(snap, view.child_ref(i)?)?;
            }
        }
        self.store.release(node)
    }

    // ------------------------------------------------------------------
    // Mutation machinery
    // ------------------------------------------------------------------

    fn apply_edit(&self, snap: &Snapshot, out: &WalkOutcome, edit: LeafEdit) -> Result<()> {
        let mut m = Mutation::new(&self.store);
        match self.stage_edit(&mut m, snap, out, edit) {
            Ok(new_root) => m.commit(self.id, new_root),
            Err(err) => {
                m.abort();
                Err(err)
            }
        }
    }

    fn stage_edit(
        &self,
        m: &mut Mutation<'_>,
        snap: &Snapshot,
        out: &WalkOutcome,
        edit: LeafEdit,
    ) -> Result<NodeRef> {
        let shrinking = edit.shrinks();
        let mut patch = self.edit_leaf(m, snap, out, edit)?;
        for depth in (0..out.path.len()).rev() {
            let step = out.path[depth];
            if shrinking && patch.insert_right.is_none() {
                patch = self.maybe_rebalance(m, snap, step, patch)?;
            }
            patch = self.apply_to_branch(m, snap, step, patch)?;
        }
        if let Some(right) = patch.insert_right.take() {
            return self.grow_root(m, snap, patch.replace, right);
        }
        self.collapse_root(m, patch.replace.node)
    }

    /// Applies the edit to a private copy of the target leaf, splitting it
    /// when the content no longer fits.
    fn edit_leaf(
        &self,
        m: &mut Mutation<'_>,
        snap: &Snapshot,
        out: &WalkOutcome,
        edit: LeafEdit,
    ) -> Result<Patch> {
        let (fresh, mut buf) = self.store.copy_on_write(out.leaf)?;
        let attempt = self.try_leaf_edit(&mut buf, &edit);
        match attempt {
            Ok(()) => {
                let info = info_of(&buf, fresh)?;
                m.obsolete.push(out.leaf);
                m.publish(fresh, buf)?;
                Ok(Patch::replace_only(info))
            }
            Err(BrambleError::CapacityExceeded(_)) => {
                let _ = self.store.discard(fresh);
                trace!(leaf = out.leaf.0, "leaf overflow, splitting");
                self.split_leaf(m, snap, out, edit)
            }
            Err(err) => {
                let _ = self.store.discard(fresh);
                Err(err)
            }
        }
    }

    fn try_leaf_edit(&self, buf: &mut [u8], edit: &LeafEdit) -> Result<()> {
        let mut node = NodeViewMut::parse(buf)?;
        match edit {
            LeafEdit::Insert(i, entry) => {
                if !self.entry_cap_ok(true, node.entries()? + 1) {
                    return Err(BrambleError::CapacityExceeded("leaf entry cap reached"));
                }
                node.insert_entry(*i, entry)
            }
            LeafEdit::SetValue(i, value) => node.keyed_set_value(*i, value),
            LeafEdit::SetElem(i, elem) => node.seq_set(*i, elem),
            LeafEdit::SetBit(i, bit) => node.bits_set(*i, *bit),
            LeafEdit::Remove(i) => node.remove_entries(*i, 1),
        }
    }

    fn split_leaf(
        &self,
        m: &mut Mutation<'_>,
        snap: &Snapshot,
        out: &WalkOutcome,
        edit: LeafEdit,
    ) -> Result<Patch> {
        let orig = snap.read(out.leaf)?;
        let oview = NodeView::parse(orig.data())?;
        let n = oview.entries()?;
        if n < 2 {
            return Err(BrambleError::CapacityExceeded("element exceeds node capacity"));
        }
        let split_at = n / 2;
        let (left_ref, mut lbuf) = self.store.copy_on_write(out.leaf)?;
        let (right_ref, mut rbuf) = match self.store.allocate() {
            Ok(pair) => pair,
            Err(err) => {
                let _ = self.store.discard(left_ref);
                return Err(err);
            }
        };
        let filled = (|| -> Result<()> {
            node::init_leaf(&mut rbuf, self.desc.leaf_layout, self.desc.elem_width)?;
            let tail = oview.take_range(split_at, n)?;
            {
                let mut right = NodeViewMut::parse(&mut rbuf)?;
                for entry in &tail {
                    right.push_entry(entry)?;
                }
            }
            {
                let mut left = NodeViewMut::parse(&mut lbuf)?;
                left.remove_entries(split_at, n - split_at)?;
            }
            match edit {
                LeafEdit::Insert(i, ref entry) => {
                    if i <= split_at {
                        NodeViewMut::parse(&mut lbuf)?.insert_entry(i, entry)?;
                    } else {
                        NodeViewMut::parse(&mut rbuf)?.insert_entry(i - split_at, entry)?;
                    }
                }
                LeafEdit::SetValue(i, ref value) => {
                    if i < split_at {
                        NodeViewMut::parse(&mut lbuf)?.keyed_set_value(i, value)?;
                    } else {
                        NodeViewMut::parse(&mut rbuf)?.keyed_set_value(i - split_at, value)?;
                    }
                }
                _ => return Err(BrambleError::Invalid("edit cannot overflow a leaf")),
            }
            Ok(())
        })();
        if let Err(err) = filled {
            let _ = self.store.discard(left_ref);
            let _ = self.store.discard(right_ref);
            return Err(err);
        }
        let left_info = info_of(&lbuf, left_ref)?;
        let right_info = info_of(&rbuf, right_ref)?;
        m.obsolete.push(out.leaf);
        m.publish(left_ref, lbuf)?;
        m.publish(right_ref, rbuf)?;
        debug!(
            left = left_ref.0,
            right = right_ref.0,
            "leaf split"
        );
        Ok(Patch {
            primary_at: None,
            replace: left_info,
            second: None,
            remove_at: None,
            insert_right: Some(right_info),
        })
    }

    /// Applies a child patch to a private copy of the branch at `step`,
    /// splitting the branch when the patch no longer fits.
    fn apply_to_branch(
        &self,
        m: &mut Mutation<'_>,
        snap: &Snapshot,
        step: PathStep,
        patch: Patch,
    ) -> Result<Patch> {
        let (fresh, mut buf) = self.store.copy_on_write(step.node)?;
        let attempt = self.try_branch_patch(&mut buf, step, &patch);
        match attempt {
            Ok(()) => {
                let info = info_of(&buf, fresh)?;
                m.obsolete.push(step.node);
                m.publish(fresh, buf)?;
                Ok(Patch::replace_only(info))
            }
            Err(BrambleError::CapacityExceeded(_)) => {
                let _ = self.store.discard(fresh);
                trace!(branch = step.node.0, "branch overflow, splitting");
                self.split_branch(m, snap, step, patch)
            }
            Err(err) => {
                let _ = self.store.discard(fresh);
                Err(err)
            }
        }
    }

    fn try_branch_patch(&self, buf: &mut [u8], step: PathStep, patch: &Patch) -> Result<()> {
        let primary = patch.primary_at.unwrap_or(step.child);
        let mut node = NodeViewMut::parse(buf)?;
        self.write_child(&mut node, primary, &patch.replace)?;
        if let Some((idx, info)) = &patch.second {
            self.write_child(&mut node, *idx, info)?;
        }
        if let Some(at) = patch.remove_at {
            node.remove_entries(at, 1)?;
        }
        if let Some(right) = &patch.insert_right {
            if !self.entry_cap_ok(false, node.entries()? + 1) {
                return Err(BrambleError::CapacityExceeded("branch entry cap reached"));
            }
            node.branch_insert(primary + 1, right.max_key.as_deref(), right.node, right.summary)?;
        }
        Ok(())
    }

    fn write_child(&self, node: &mut NodeViewMut<'_>, idx: usize, info: &ChildInfo) -> Result<()> {
        node.branch_set_child(idx, info.node)?;
        node.branch_set_summary(idx, info.summary)?;
        if node.layout().has_separators() {
            let sep = info
                .max_key
                .as_deref()
                .ok_or(BrambleError::Corruption("keyed child without max key"))?;
            node.branch_set_separator(idx, sep)?;
        }
        Ok(())
    }

    fn split_branch(
        &self,
        m: &mut Mutation<'_>,
        snap: &Snapshot,
        step: PathStep,
        patch: Patch,
    ) -> Result<Patch> {
        let orig = snap.read(step.node)?;
        let oview = NodeView::parse(orig.data())?;
        let n = oview.entries()?;
        if n < 2 {
            return Err(BrambleError::CapacityExceeded("branch entry exceeds node capacity"));
        }
        let level = oview.level();
        let layout = oview.layout();
        let split_at = n / 2;
        let primary = patch.primary_at.unwrap_or(step.child);
        let (left_ref, mut lbuf) = self.store.copy_on_write(step.node)?;
        let (right_ref, mut rbuf) = match self.store.allocate() {
            Ok(pair) => pair,
            Err(err) => {
                let _ = self.store.discard(left_ref);
                return Err(err);
            }
        };
        let filled = (|| -> Result<()> {
            node::init_branch(&mut rbuf, layout, level)?;
            let tail = oview.take_range(split_at, n)?;
            {
                let mut right = NodeViewMut::parse(&mut rbuf)?;
                for entry in &tail {
                    right.push_entry(entry)?;
                }
            }
            {
                let mut left = NodeViewMut::parse(&mut lbuf)?;
                left.remove_entries(split_at, n - split_at)?;
            }
            // Re-apply the full patch, mapping each component to its half.
            let mut apply_child = |idx: usize, info: &ChildInfo| -> Result<()> {
                if idx < split_at {
                    self.write_child(&mut NodeViewMut::parse(&mut lbuf)?, idx, info)
                } else {
                    self.write_child(&mut NodeViewMut::parse(&mut rbuf)?, idx - split_at, info)
                }
            };
            apply_child(primary, &patch.replace)?;
            if let Some((idx, info)) = &patch.second {
                apply_child(*idx, info)?;
            }
            if let Some(at) = patch.remove_at {
                if at < split_at {
                    NodeViewMut::parse(&mut lbuf)?.remove_entries(at, 1)?;
                } else {
                    NodeViewMut::parse(&mut rbuf)?.remove_entries(at - split_at, 1)?;
                }
            }
            if let Some(right_child) = &patch.insert_right {
                let at = primary + 1;
                let (half, local) = if primary < split_at {
                    (&mut lbuf, at)
                } else {
                    (&mut rbuf, at - split_at)
                };
                NodeViewMut::parse(half)?.branch_insert(
                    local,
                    right_child.max_key.as_deref(),
                    right_child.node,
                    right_child.summary,
                )?;
            }
            Ok(())
        })();
        if let Err(err) = filled {
            let _ = self.store.discard(left_ref);
            let _ = self.store.discard(right_ref);
            return Err(err);
        }
        let left_info = info_of(&lbuf, left_ref)?;
        let right_info = info_of(&rbuf, right_ref)?;
        m.obsolete.push(step.node);
        m.publish(left_ref, lbuf)?;
        m.publish(right_ref, rbuf)?;
        debug!(left = left_ref.0, right = right_ref.0, "branch split");
        Ok(Patch {
            primary_at: None,
            replace: left_info,
            second: None,
            remove_at: None,
            insert_right: Some(right_info),
        })
    }

    /// Restores the fanout invariant for an underfull child before its
    /// parent at `step` is rewritten.
    fn maybe_rebalance(
        &self,
        m: &mut Mutation<'_>,
        snap: &Snapshot,
        step: PathStep,
        patch: Patch,
    ) -> Result<Patch> {
        let cur_buf = self.store.read(patch.replace.node)?;
        let cur_view = NodeView::parse(cur_buf.data())?;
        if !self.is_underfull(&cur_view)? {
            return Ok(patch);
        }
        let parent_buf = snap.read(step.node)?;
        let pview = NodeView::parse(parent_buf.data())?;
        let n = pview.entries()?;
        if n < 2 {
            return Ok(patch);
        }
        let k = step.child;
        let (sib_idx, sib_on_left) = if k > 0 { (k - 1, true) } else { (k + 1, false) };
        let sib_ref = pview.child_ref(sib_idx)?;
        let sib_buf = snap.read(sib_ref)?;
        let sib_view = NodeView::parse(sib_buf.data())?;
        let merge_fits = {
            let cap = if cur_view.is_leaf() {
                self.opts.max_leaf_entries
            } else {
                self.opts.max_branch_entries
            };
            match cap {
                Some(max) => sib_view.entries()? + cur_view.entries()? <= max,
                // Conservative: counts shared per-node overhead twice.
                None => sib_view.used_bytes()? + cur_view.used_bytes()? <= cur_view.capacity(),
            }
        };
        if self.has_slack(&sib_view)? || !merge_fits {
            self.redistribute(m, patch, k, sib_idx, sib_ref, sib_on_left)
        } else {
            self.merge(m, patch, k, sib_idx, sib_ref, sib_on_left)
        }
    }

    fn redistribute(
        &self,
        m: &mut Mutation<'_>,
        patch: Patch,
        k: usize,
        sib_idx: usize,
        sib_ref: NodeRef,
        sib_on_left: bool,
    ) -> Result<Patch> {
        let cur_ref = patch.replace.node;
        let (new_sib, mut sbuf) = self.store.copy_on_write(sib_ref)?;
        let (new_cur, mut cbuf) = match self.store.copy_on_write(cur_ref) {
            Ok(pair) => pair,
            Err(err) => {
                let _ = self.store.discard(new_sib);
                return Err(err);
            }
        };
        let moved = (|| -> Result<()> {
            let sib_entries = NodeViewMut::parse(&mut sbuf)?.entries()?;
            let cur_entries = NodeViewMut::parse(&mut cbuf)?.entries()?;
            let target = (sib_entries + cur_entries) / 2;
            let move_n = sib_entries.saturating_sub(target).max(1);
            if sib_on_left {
                let start = sib_entries - move_n;
                let moved = NodeView::parse(&sbuf)?.take_range(start, sib_entries)?;
                NodeViewMut::parse(&mut sbuf)?.remove_entries(start, move_n)?;
                let mut cur = NodeViewMut::parse(&mut cbuf)?;
                for (i, entry) in moved.iter().enumerate() {
                    cur.insert_entry(i, entry)?;
                }
            } else {
                let moved = NodeView::parse(&sbuf)?.take_range(0, move_n)?;
                NodeViewMut::parse(&mut sbuf)?.remove_entries(0, move_n)?;
                let mut cur = NodeViewMut::parse(&mut cbuf)?;
                for entry in moved.iter() {
                    cur.push_entry(entry)?;
                }
            }
            Ok(())
        })();
        if let Err(err) = moved {
            let _ = self.store.discard(new_sib);
            let _ = self.store.discard(new_cur);
            return Err(err);
        }
        let sib_info = info_of(&sbuf, new_sib)?;
        let cur_info = info_of(&cbuf, new_cur)?;
        m.obsolete.push(sib_ref);
        m.obsolete.push(cur_ref);
        m.publish(new_sib, sbuf)?;
        m.publish(new_cur, cbuf)?;
        trace!(from = sib_ref.0, into = cur_ref.0, "redistributed entries");
        Ok(Patch {
            primary_at: Some(k),
            replace: cur_info,
            second: Some((sib_idx, sib_info)),
            remove_at: None,
            insert_right: None,
        })
    }

    fn merge(
        &self,
        m: &mut Mutation<'_>,
        patch: Patch,
        k: usize,
        sib_idx: usize,
        sib_ref: NodeRef,
        sib_on_left: bool,
    ) -> Result<Patch> {
        let cur_ref = patch.replace.node;
        // Always merge the right node into the left one.
        let (left_idx, left_ref, right_ref) = if sib_on_left {
            (sib_idx, sib_ref, cur_ref)
        } else {
            (k, cur_ref, sib_ref)
        };
        let (new_left, mut lbuf) = self.store.copy_on_write(left_ref)?;
        let appended = (|| -> Result<()> {
            let right_buf = self.store.read(right_ref)?;
            let right_view = NodeView::parse(right_buf.data())?;
            let moved = right_view.take_range(0, right_view.entries()?)?;
            let mut left = NodeViewMut::parse(&mut lbuf)?;
            for entry in moved.iter() {
                left.push_entry(entry)?;
            }
            Ok(())
        })();
        if let Err(err) = appended {
            let _ = self.store.discard(new_left);
            return Err(err);
        }
        let left_info = info_of(&lbuf, new_left)?;
        m.obsolete.push(left_ref);
        m.obsolete.push(right_ref);
        m.publish(new_left, lbuf)?;
        debug!(left = left_ref.0, right = right_ref.0, "merged nodes");
        Ok(Patch {
            primary_at: Some(left_idx),
            replace: left_info,
            second: None,
            remove_at: Some(left_idx + 1),
            insert_right: None,
        })
    }

    fn grow_root(
        &self,
        m: &mut Mutation<'_>,
        snap: &Snapshot,
        left: ChildInfo,
        right: ChildInfo,
    ) -> Result<NodeRef> {
        let old_root = snap.read(snap.root())?;
        let old_level = NodeView::parse(old_root.data())?.level();
        let (root_ref, mut buf) = self.store.allocate()?;
        let built = (|| -> Result<()> {
            node::init_branch(&mut buf, self.desc.branch_layout(), old_level + 1)?;
            let mut node = NodeViewMut::parse(&mut buf)?;
            node.branch_insert(0, left.max_key.as_deref(), left.node, left.summary)?;
            node.branch_insert(1, right.max_key.as_deref(), right.node, right.summary)?;
            Ok(())
        })();
        if let Err(err) = built {
            let _ = self.store.discard(root_ref);
            return Err(err);
        }
        m.publish(root_ref, buf)?;
        debug!(root = root_ref.0, level = old_level + 1, "root split, tree grew");
        Ok(root_ref)
    }

    /// Collapses single-child branch roots after merges shrank the tree.
    fn collapse_root(&self, m: &mut Mutation<'_>, mut root: NodeRef) -> Result<NodeRef> {
        loop {
            let buf = self.store.read(root)?;
            let view = NodeView::parse(buf.data())?;
            if view.is_leaf() || view.entries()? != 1 {
                return Ok(root);
            }
            let only_child = view.child_ref(0)?;
            m.obsolete.push(root);
            debug!(root = root.0, child = only_child.0, "root collapsed, tree shrank");
            root = only_child;
        }
    }

    // ------------------------------------------------------------------
    // Fill policy
    // ------------------------------------------------------------------

    fn entry_cap_ok(&self, leaf: bool, entries_after: usize) -> bool {
        let cap = if leaf {
            self.opts.max_leaf_entries
        } else {
            self.opts.max_branch_entries
        };
        cap.map_or(true, |max| entries_after <= max)
    }

    /// Minimum entries a non-root node of this kind must hold. Branches
    /// never drop below two children: a one-child branch is only ever a
    /// transient root about to collapse.
    fn node_min(&self, leaf: bool) -> usize {
        let cap = if leaf {
            self.opts.max_leaf_entries
        } else {
            self.opts.max_branch_entries
        };
        let base = self.opts.min_entries(cap);
        if leaf {
            base
        } else {
            base.max(2)
        }
    }

    fn is_underfull(&self, view: &NodeView<'_>) -> Result<bool> {
        let leaf = view.is_leaf();
        let entries = view.entries()?;
        if entries < self.node_min(leaf) {
            return Ok(true);
        }
        let cap = if leaf {
            self.opts.max_leaf_entries
        } else {
            self.opts.max_branch_entries
        };
        Ok(match cap {
            Some(_) => false,
            None => {
                view.used_bytes()? * 100 < view.capacity() * self.opts.min_fill_percent as usize
            }
        })
    }

    /// Whether a sibling can donate entries without dropping below its own
    /// minimum.
    fn has_slack(&self, view: &NodeView<'_>) -> Result<bool> {
        let leaf = view.is_leaf();
        let entries = view.entries()?;
        if entries <= self.node_min(leaf) {
            return Ok(false);
        }
        let cap = if leaf {
            self.opts.max_leaf_entries
        } else {
            self.opts.max_branch_entries
        };
        Ok(match cap {
            Some(_) => true,
            None => {
                view.used_bytes()? * 100 > view.capacity() * self.opts.min_fill_percent as usize * 2
            }
        })
    }

    // ------------------------------------------------------------------
    // Bulk loading
    // ------------------------------------------------------------------

    /// Builds the tree bottom-up from ordered entries.
    ///
    /// The container must still be empty; input order is the container
    /// order (sorted keys for keyed containers, positional otherwise).
    pub fn bulk_load<I>(&self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = Entry>,
    {
        let snap = self.snapshot()?;
        if self.len_in(&snap)? != 0 {
            return Err(BrambleError::Invalid("bulk load requires an empty container"));
        }
        let old_root = snap.root();
        let mut m = Mutation::new(&self.store);
        match self.bulk_stage(&mut m, items) {
            Ok(Some(new_root)) => {
                m.obsolete.push(old_root);
                m.commit(self.id, new_root)
            }
            Ok(None) => {
                // Empty input: the existing empty leaf stays the root.
                m.abort();
                Ok(())
            }
            Err(err) => {
                m.abort();
                Err(err)
            }
        }
    }

    fn bulk_stage<I>(&self, m: &mut Mutation<'_>, items: I) -> Result<Option<NodeRef>>
    where
        I: IntoIterator<Item = Entry>,
    {
        let mut infos = self.bulk_level(m, items, true, 0)?;
        if infos.is_empty() {
            return Ok(None);
        }
        let mut level = 1u8;
        while infos.len() > 1 {
            let entries: Vec<Entry> = infos
                .into_iter()
                .map(|info| Entry::Branch {
                    sep: info.max_key,
                    child: info.node,
                    summary: info.summary,
                })
                .collect();
            infos = self.bulk_level(m, entries, false, level)?;
            level += 1;
        }
        Ok(Some(infos[0].node))
    }

    /// Builds one tree level at the configured fill factor, balancing the
    /// final two nodes so no node ends up underfull.
    fn bulk_level<I>(
        &self,
        m: &mut Mutation<'_>,
        items: I,
        leaf: bool,
        level: u8,
    ) -> Result<Vec<ChildInfo>>
    where
        I: IntoIterator<Item = Entry>,
    {
        let mut built: Vec<(NodeRef, Vec<u8>)> = Vec::new();
        let mut current: Option<(NodeRef, Vec<u8>)> = None;
        for entry in items {
            loop {
                if current.is_none() {
                    current = Some(self.bulk_new_node(m, leaf, level)?);
                }
                let (_, buf) = current.as_mut().ok_or(BrambleError::Corruption("no open node"))?;
                if self.bulk_node_open(buf, leaf)? {
                    let empty = NodeView::parse(buf)?.entries()? == 0;
                    let mut node = NodeViewMut::parse(buf)?;
                    match node.push_entry(&entry) {
                        Ok(()) => break,
                        Err(BrambleError::CapacityExceeded(_)) if !empty => {}
                        Err(err) => return Err(err),
                    }
                }
                let full = current.take().ok_or(BrambleError::Corruption("no open node"))?;
                built.push(full);
            }
        }
        if let Some(last) = current.take() {
            built.push(last);
        }
        // A short final node borrows from its left neighbor.
        if built.len() >= 2 {
            let last_view_underfull = {
                let (_, buf) = &built[built.len() - 1];
                self.is_underfull(&NodeView::parse(buf)?)?
            };
            if last_view_underfull {
                let split_at = built.len() - 1;
                let (left_half, right_half) = built.split_at_mut(split_at);
                let (_, prev_buf) = &mut left_half[left_half.len() - 1];
                let (_, last_buf) = &mut right_half[0];
                balance_pair(prev_buf, last_buf)?;
            }
        }
        let mut infos = Vec::with_capacity(built.len());
        for (node_ref, buf) in built {
            infos.push(info_of(&buf, node_ref)?);
            m.publish(node_ref, buf)?;
        }
        Ok(infos)
    }

    fn bulk_new_node(&self, _m: &mut Mutation<'_>, leaf: bool, level: u8) -> Result<(NodeRef, Vec<u8>)> {
        let (node_ref, mut buf) = self.store.allocate()?;
        let built = if leaf {
            node::init_leaf(&mut buf, self.desc.leaf_layout, self.desc.elem_width)
        } else {
            node::init_branch(&mut buf, self.desc.branch_layout(), level)
        };
        if let Err(err) = built {
            let _ = self.store.discard(node_ref);
            return Err(err);
        }
        Ok((node_ref, buf))
    }

    /// Whether a node under construction is still below its bulk fill
    /// target.
    fn bulk_node_open(&self, buf: &[u8], leaf: bool) -> Result<bool> {
        let view = NodeView::parse(buf)?;
        let entries = view.entries()?;
        let cap = if leaf {
            self.opts.max_leaf_entries
        } else {
            self.opts.max_branch_entries
        };
        Ok(match cap {
            Some(max) => {
                let target = ((max * self.opts.bulk_fill_percent as usize) / 100).max(1);
                entries < target
            }
            None => {
                view.used_bytes()? * 100
                    < view.capacity() * self.opts.bulk_fill_percent as usize
            }
        })
    }

    // ------------------------------------------------------------------
    // Verification
    // ------------------------------------------------------------------

    /// Recomputes every aggregate and checks the structural invariants:
    /// branch summaries match their subtrees, separators equal child max
    /// keys, keys are ordered, leaves share one depth and no non-root node
    /// is underfull.
    pub fn verify(&self) -> Result<TreeStats> {
        let snap = self.snapshot()?;
        let mut stats = TreeStats {
            height: 0,
            nodes: 0,
            entries: 0,
        };
        let (summary, _max, level) = self.check_node(&snap, snap.root(), true, &mut stats)?;
        stats.height = level as usize + 1;
        stats.entries = summary.count;
        Ok(stats)
    }

    fn check_node(
        &self,
        snap: &Snapshot,
        node: NodeRef,
        is_root: bool,
        stats: &mut TreeStats,
    ) -> Result<(Summary, Option<Vec<u8>>, u8)> {
        let buf = snap.read(node)?;
        let view = NodeView::parse(buf.data())?;
        stats.nodes += 1;
        if !is_root && self.is_underfull(&view)? {
            return Err(BrambleError::Corruption("non-root node underfull"));
        }
        if !self.entry_cap_ok(view.is_leaf(), view.entries()?) {
            return Err(BrambleError::Corruption("node exceeds entry cap"));
        }
        if view.is_leaf() {
            if matches!(view.layout(), NodeLayout::KeyedLeaf | NodeLayout::SetLeaf) {
                for i in 1..view.entries()? {
                    if view.key_at(i - 1)? > view.key_at(i)? {
                        return Err(BrambleError::Corruption("leaf keys out of order"));
                    }
                }
            }
            return Ok((view.summary()?, view.max_key()?, 0));
        }
        let n = view.entries()?;
        if n == 0 {
            return Err(BrambleError::Corruption("branch without children"));
        }
        let mut total = Summary::default();
        let mut prev_max: Option<Vec<u8>> = None;
        for i in 0..n {
            let child = view.child_ref(i)?;
            let (child_summary, child_max, child_level) =
                self.check_node(snap, child, false, stats)?;
            if child_level + 1 != view.level() {
                return Err(BrambleError::Corruption("uneven tree depth"));
            }
            if view.child_summary(i)? != child_summary {
                return Err(BrambleError::Corruption("stored summary diverges from subtree"));
            }
            if view.layout().has_separators() {
                let sep = view.separator(i)?;
                let child_max =
                    child_max.ok_or(BrambleError::Corruption("keyed child without max key"))?;
                if sep != child_max.as_slice() {
                    return Err(BrambleError::Corruption("separator diverges from child max"));
                }
                if let Some(prev) = &prev_max {
                    if prev.as_slice() > sep {
                        return Err(BrambleError::Corruption("separators out of order"));
                    }
                }
                prev_max = Some(child_max);
            }
            total = total
                .checked_add(child_summary)
                .ok_or(BrambleError::AggregateOverflow("tree summary"))?;
        }
        Ok((total, view.max_key()?, view.level()))
    }
}

fn validate_options(opts: &TreeOptions) -> Result<()> {
    if opts.max_leaf_entries.is_some_and(|max| max < 2) {
        return Err(BrambleError::Invalid("leaf cap must allow at least two entries"));
    }
    if opts.max_branch_entries.is_some_and(|max| max < 4) {
        return Err(BrambleError::Invalid("branch cap must allow at least four children"));
    }
    if opts.min_fill_percent > 50 {
        return Err(BrambleError::Invalid("min fill percent above 50 cannot rebalance"));
    }
    if opts.bulk_fill_percent == 0 || opts.bulk_fill_percent > 100 {
        return Err(BrambleError::Invalid("bulk fill percent out of range"));
    }
    Ok(())
}

/// Moves entries from the left node of a bulk-built pair into the right one
/// until the right node is no longer the short straggler.
fn balance_pair(left: &mut [u8], right: &mut [u8]) -> Result<()> {
    let left_entries = NodeView::parse(left)?.entries()?;
    let right_entries = NodeView::parse(right)?.entries()?;
    let total = left_entries + right_entries;
    let target_right = total / 2;
    if target_right <= right_entries {
        return Ok(());
    }
    let move_n = target_right - right_entries;
    let start = left_entries - move_n;
    let moved = NodeView::parse(left)?.take_range(start, left_entries)?;
    NodeViewMut::parse(left)?.remove_entries(start, move_n)?;
    let mut right_node = NodeViewMut::parse(right)?;
    for (i, entry) in moved.iter().enumerate() {
        right_node.insert_entry(i, entry)?;
    }
    Ok(())
}
