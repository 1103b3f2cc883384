//! Uniform read/write views over node buffers.
//!
//! `NodeView` and `NodeViewMut` expose the operation set walkers and tree
//! operations need (entry counts, child summaries, in-node search, entry
//! edits), dispatching internally on the node's [`NodeLayout`]. Mutators
//! pre-check the byte budget against the packed allocator's free space, so
//! a `CapacityExceeded` return leaves the buffer untouched and the caller
//! free to split.

use crate::error::{BrambleError, Result};
use crate::node::layout::{stream, NodeLayout};
use crate::packed::alloc::{self, NodeHeader};
use crate::packed::bits::{self, BitSeq};
use crate::packed::fse::{self, FseArray};
use crate::packed::fse_tree::{self, FseTree};
use crate::packed::vle::{self, VleArray};
use crate::types::{NodeRef, Summary};

/// One logical node entry in a layout-independent form, used when moving
/// content between nodes during split, merge and redistribution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Entry {
    /// Key/value pair (value empty for key-only leaves).
    Keyed {
        /// Encoded key bytes.
        key: Vec<u8>,
        /// Encoded value bytes.
        value: Vec<u8>,
    },
    /// Fixed-width sequence element.
    Seq(Vec<u8>),
    /// Single bit.
    Bit(bool),
    /// Branch entry: optional separator, child reference, child summary.
    Branch {
        /// Separator (subtree max key) for keyed branches.
        sep: Option<Vec<u8>>,
        /// Child node reference.
        child: NodeRef,
        /// Cached child subtree summary.
        summary: Summary,
    },
}

fn decode_node_ref(bytes: &[u8]) -> Result<NodeRef> {
    if bytes.len() != 8 {
        return Err(BrambleError::Corruption("child reference width mismatch"));
    }
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    Ok(NodeRef(u64::from_be_bytes(arr)))
}

/// Read-only view over a parsed node buffer.
#[derive(Clone, Copy)]
pub struct NodeView<'a> {
    buf: &'a [u8],
    layout: NodeLayout,
    level: u8,
}

impl<'a> NodeView<'a> {
    /// Parses and dispatches a node buffer.
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        let header = NodeHeader::parse(buf)?;
        let layout = NodeLayout::from_tag(header.tag)?;
        if header.stream_count as usize != layout.stream_count() {
            return Err(BrambleError::Corruption("node stream count mismatch"));
        }
        if layout.is_leaf() != (header.level == 0) {
            return Err(BrambleError::Corruption("node level contradicts layout"));
        }
        Ok(Self {
            buf,
            layout,
            level: header.level,
        })
    }

    /// The dispatched layout.
    pub fn layout(&self) -> NodeLayout {
        self.layout
    }

    /// Tree level (0 = leaf).
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Whether this node is a leaf.
    pub fn is_leaf(&self) -> bool {
        self.layout.is_leaf()
    }

    /// Bytes consumed inside the node buffer.
    pub fn used_bytes(&self) -> Result<usize> {
        alloc::used_bytes(self.buf)
    }

    /// Node buffer capacity.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn keys(&self) -> Result<VleArray<'a>> {
        VleArray::parse(alloc::stream(self.buf, stream::KEYS)?)
    }

    fn values(&self) -> Result<VleArray<'a>> {
        VleArray::parse(alloc::stream(self.buf, stream::VALUES)?)
    }

    fn separators(&self) -> Result<VleArray<'a>> {
        VleArray::parse(alloc::stream(self.buf, stream::SEPARATORS)?)
    }

    fn children(&self) -> Result<FseArray<'a>> {
        FseArray::parse(alloc::stream(self.buf, self.layout.children_stream())?)
    }

    fn counts(&self) -> Result<FseTree<'a>> {
        FseTree::parse(alloc::stream(self.buf, self.layout.counts_stream())?)
    }

    fn ones_tree(&self) -> Result<FseTree<'a>> {
        FseTree::parse(alloc::stream(self.buf, stream::ONES)?)
    }

    fn elems(&self) -> Result<FseArray<'a>> {
        FseArray::parse(alloc::stream(self.buf, stream::ELEMS)?)
    }

    /// Bit-sequence stream of a bits leaf.
    pub fn bits(&self) -> Result<BitSeq<'a>> {
        if self.layout != NodeLayout::BitsLeaf {
            return Err(BrambleError::Invalid("node has no bit stream"));
        }
        BitSeq::parse(alloc::stream(self.buf, stream::ELEMS)?)
    }

    /// Number of entries: leaf elements, or branch children.
    pub fn entries(&self) -> Result<usize> {
        match self.layout {
            NodeLayout::KeyedLeaf | NodeLayout::SetLeaf => Ok(self.keys()?.size()),
            NodeLayout::SeqLeaf => Ok(self.elems()?.size()),
            NodeLayout::BitsLeaf => Ok(self.bits()?.size()),
            NodeLayout::KeyedBranch | NodeLayout::SeqBranch | NodeLayout::BitsBranch => {
                Ok(self.children()?.size())
            }
        }
    }

    /// Aggregate summary of this node's subtree.
    ///
    /// For a leaf this is its own content; for a branch, the total of the
    /// cached child summaries.
    pub fn summary(&self) -> Result<Summary> {
        match self.layout {
            NodeLayout::KeyedLeaf | NodeLayout::SetLeaf => {
                Ok(Summary::of_count(self.keys()?.size() as u64))
            }
            NodeLayout::SeqLeaf => Ok(Summary::of_count(self.elems()?.size() as u64)),
            NodeLayout::BitsLeaf => {
                let bits = self.bits()?;
                Ok(Summary {
                    count: bits.size() as u64,
                    ones: bits.count_ones(),
                })
            }
            NodeLayout::KeyedBranch | NodeLayout::SeqBranch => {
                Ok(Summary::of_count(self.counts()?.total()))
            }
            NodeLayout::BitsBranch => Ok(Summary {
                count: self.counts()?.total(),
                ones: self.ones_tree()?.total(),
            }),
        }
    }

    /// Child reference at branch offset `i`.
    pub fn child_ref(&self, i: usize) -> Result<NodeRef> {
        decode_node_ref(self.children()?.get(i)?)
    }

    /// Cached summary of child `i`.
    pub fn child_summary(&self, i: usize) -> Result<Summary> {
        let count = self.counts()?.get(i)?;
        let ones = if self.layout.tracks_ones() {
            self.ones_tree()?.get(i)?
        } else {
            0
        };
        Ok(Summary { count, ones })
    }

    /// Separator (subtree max key) of child `i`; keyed branches only.
    pub fn separator(&self, i: usize) -> Result<&'a [u8]> {
        self.separators()?.get(i)
    }

    /// Sum of child entry counts before branch offset `i`.
    pub fn count_prefix(&self, i: usize) -> Result<u64> {
        self.counts()?.sum_prefix(i)
    }

    /// Sum of child set-bit counts before branch offset `i`.
    pub fn ones_prefix(&self, i: usize) -> Result<u64> {
        self.ones_tree()?.sum_prefix(i)
    }

    /// Child whose cumulative entry count first exceeds `target`.
    pub fn locate_count(&self, target: u64) -> Result<Option<(usize, u64)>> {
        self.counts()?.locate(target)
    }

    /// Child whose cumulative `symbol` count first exceeds `target`.
    ///
    /// Set-bit counts resolve through the ones index; zero counts are
    /// derived (`count - ones`) with a binary search over the two prefix
    /// sums.
    pub fn locate_symbol(&self, target: u64, symbol: bool) -> Result<Option<(usize, u64)>> {
        let ones = self.ones_tree()?;
        if symbol {
            return ones.locate(target);
        }
        let counts = self.counts()?;
        let n = counts.size();
        let total = counts
            .total()
            .checked_sub(ones.total())
            .ok_or(BrambleError::Corruption("ones exceed entry counts"))?;
        if n == 0 || total <= target {
            return Ok(None);
        }
        let zeros_prefix = |i: usize| -> Result<u64> {
            counts
                .sum_prefix(i)?
                .checked_sub(ones.sum_prefix(i)?)
                .ok_or(BrambleError::Corruption("ones exceed entry counts"))
        };
        let mut lo = 0usize;
        let mut hi = n - 1;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if zeros_prefix(mid + 1)? > target {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(Some((lo, zeros_prefix(lo)?)))
    }

    /// First child whose separator admits `key`; the last child when `key`
    /// exceeds every separator.
    pub fn search_separators(&self, key: &[u8]) -> Result<usize> {
        let seps = self.separators()?;
        let n = seps.size();
        if n == 0 {
            return Err(BrambleError::Corruption("keyed branch without children"));
        }
        let mut lo = 0usize;
        let mut hi = n;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if seps.get(mid)? < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo.min(n - 1))
    }

    /// Key bytes at leaf offset `i`.
    pub fn key_at(&self, i: usize) -> Result<&'a [u8]> {
        self.keys()?.get(i)
    }

    /// Value bytes at leaf offset `i` (empty for key-only leaves).
    pub fn value_at(&self, i: usize) -> Result<&'a [u8]> {
        match self.layout {
            NodeLayout::KeyedLeaf => self.values()?.get(i),
            NodeLayout::SetLeaf => {
                let keys = self.keys()?;
                if i >= keys.size() {
                    return Err(BrambleError::OutOfBounds {
                        index: i as u64,
                        len: keys.size() as u64,
                    });
                }
                Ok(&[])
            }
            _ => Err(BrambleError::Invalid("node has no value stream")),
        }
    }

    /// Fixed-width element bytes at leaf offset `i`.
    pub fn seq_elem(&self, i: usize) -> Result<&'a [u8]> {
        self.elems()?.get(i)
    }

    /// Leftmost leaf offset with `key_at(offset) >= key`; the flag reports
    /// an exact match.
    pub fn lower_bound(&self, key: &[u8]) -> Result<(usize, bool)> {
        let keys = self.keys()?;
        let n = keys.size();
        let mut lo = 0usize;
        let mut hi = n;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if keys.get(mid)? < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let found = lo < n && keys.get(lo)? == key;
        Ok((lo, found))
    }

    /// Largest key in this node: last leaf key, or last separator.
    pub fn max_key(&self) -> Result<Option<Vec<u8>>> {
        match self.layout {
            NodeLayout::KeyedLeaf | NodeLayout::SetLeaf => {
                let keys = self.keys()?;
                match keys.size() {
                    0 => Ok(None),
                    n => Ok(Some(keys.get(n - 1)?.to_vec())),
                }
            }
            NodeLayout::KeyedBranch => {
                let seps = self.separators()?;
                match seps.size() {
                    0 => Ok(None),
                    n => Ok(Some(seps.get(n - 1)?.to_vec())),
                }
            }
            _ => Ok(None),
        }
    }

    /// Extracts entry `i` in layout-independent form.
    pub fn entry(&self, i: usize) -> Result<Entry> {
        match self.layout {
            NodeLayout::KeyedLeaf | NodeLayout::SetLeaf => Ok(Entry::Keyed {
                key: self.key_at(i)?.to_vec(),
                value: self.value_at(i)?.to_vec(),
            }),
            NodeLayout::SeqLeaf => Ok(Entry::Seq(self.seq_elem(i)?.to_vec())),
            NodeLayout::BitsLeaf => Ok(Entry::Bit(self.bits()?.get(i)?)),
            NodeLayout::KeyedBranch | NodeLayout::SeqBranch | NodeLayout::BitsBranch => {
                let sep = if self.layout.has_separators() {
                    Some(self.separator(i)?.to_vec())
                } else {
                    None
                };
                Ok(Entry::Branch {
                    sep,
                    child: self.child_ref(i)?,
                    summary: self.child_summary(i)?,
                })
            }
        }
    }

    /// Extracts entries `[start, end)`.
    pub fn take_range(&self, start: usize, end: usize) -> Result<Vec<Entry>> {
        let mut out = Vec::with_capacity(end.saturating_sub(start));
        for i in start..end {
            out.push(self.entry(i)?);
        }
        Ok(out)
    }
}

/// Mutable view over a node buffer.
pub struct NodeViewMut<'a> {
    buf: &'a mut [u8],
    layout: NodeLayout,
}

impl<'a> NodeViewMut<'a> {
    /// Parses and dispatches a mutable node buffer.
    pub fn parse(buf: &'a mut [u8]) -> Result<Self> {
        let header = NodeHeader::parse(buf)?;
        let layout = NodeLayout::from_tag(header.tag)?;
        if header.stream_count as usize != layout.stream_count() {
            return Err(BrambleError::Corruption("node stream count mismatch"));
        }
        Ok(Self { buf, layout })
    }

    /// Read view over the current buffer state.
    pub fn as_view(&self) -> NodeView<'_> {
        NodeView {
            buf: self.buf,
            layout: self.layout,
            level: self.buf[4],
        }
    }

    /// The dispatched layout.
    pub fn layout(&self) -> NodeLayout {
        self.layout
    }

    /// Number of entries.
    pub fn entries(&self) -> Result<usize> {
        self.as_view().entries()
    }

    fn ensure_free(&self, need: usize) -> Result<()> {
        if need > alloc::free_space(self.buf)? {
            return Err(BrambleError::CapacityExceeded("node cannot hold entry"));
        }
        Ok(())
    }

    fn vle_grown(&self, stream_idx: usize, extra: usize) -> Result<(usize, usize)> {
        let arr = VleArray::parse(alloc::stream(self.buf, stream_idx)?)?;
        let new_len = vle::encoded_len(arr.size() + 1, arr.data_len() + extra);
        let old_len = alloc::region(self.buf, stream_idx)?.len();
        Ok((new_len, new_len.saturating_sub(old_len)))
    }

    fn tree_grown(&self, stream_idx: usize) -> Result<(usize, usize)> {
        let tree = FseTree::parse(alloc::stream(self.buf, stream_idx)?)?;
        let new_len = fse_tree::encoded_len(tree.size() + 1);
        let old_len = alloc::region(self.buf, stream_idx)?.len();
        Ok((new_len, new_len.saturating_sub(old_len)))
    }

    /// Inserts a key/value pair at leaf offset `i`.
    pub fn keyed_insert(&mut self, i: usize, key: &[u8], value: &[u8]) -> Result<()> {
        let (keys_len, keys_delta) = self.vle_grown(stream::KEYS, key.len())?;
        let mut need = keys_delta;
        let vals_len = if self.layout == NodeLayout::KeyedLeaf {
            let (vals_len, vals_delta) = self.vle_grown(stream::VALUES, value.len())?;
            need += vals_delta;
            Some(vals_len)
        } else {
            None
        };
        self.ensure_free(need)?;
        alloc::resize(self.buf, stream::KEYS, keys_len)?;
        vle::insert(alloc::stream_mut(self.buf, stream::KEYS)?, i, key)?;
        if let Some(vals_len) = vals_len {
            alloc::resize(self.buf, stream::VALUES, vals_len)?;
            vle::insert(alloc::stream_mut(self.buf, stream::VALUES)?, i, value)?;
        }
        Ok(())
    }

    /// Overwrites the value at leaf offset `i`.
    pub fn keyed_set_value(&mut self, i: usize, value: &[u8]) -> Result<()> {
        if self.layout != NodeLayout::KeyedLeaf {
            return Err(BrambleError::Invalid("node has no value stream"));
        }
        let vals = VleArray::parse(alloc::stream(self.buf, stream::VALUES)?)?;
        let old_len = vals.get(i)?.len();
        let region_len = alloc::region(self.buf, stream::VALUES)?.len();
        if value.len() > old_len {
            let grow = value.len() - old_len;
            self.ensure_free(grow)?;
            alloc::resize(self.buf, stream::VALUES, region_len + grow)?;
        }
        vle::set(alloc::stream_mut(self.buf, stream::VALUES)?, i, value)?;
        let vals = VleArray::parse(alloc::stream(self.buf, stream::VALUES)?)?;
        let live = vals.encoded_len();
        alloc::resize(self.buf, stream::VALUES, live)
    }

    /// Inserts a fixed-width element at leaf offset `i`.
    pub fn seq_insert(&mut self, i: usize, elem: &[u8]) -> Result<()> {
        let arr = FseArray::parse(alloc::stream(self.buf, stream::ELEMS)?)?;
        let new_len = fse::encoded_len(arr.width(), arr.size() + 1);
        let old_len = alloc::region(self.buf, stream::ELEMS)?.len();
        self.ensure_free(new_len.saturating_sub(old_len))?;
        alloc::resize(self.buf, stream::ELEMS, new_len)?;
        fse::insert(alloc::stream_mut(self.buf, stream::ELEMS)?, i, elem)
    }

    /// Overwrites the fixed-width element at leaf offset `i`.
    pub fn seq_set(&mut self, i: usize, elem: &[u8]) -> Result<()> {
        fse::set(alloc::stream_mut(self.buf, stream::ELEMS)?, i, elem)
    }

    /// Inserts a bit at leaf offset `i`.
    pub fn bits_insert(&mut self, i: usize, bit: bool) -> Result<()> {
        let seq = BitSeq::parse(alloc::stream(self.buf, stream::ELEMS)?)?;
        let new_len = bits::encoded_len(seq.size() + 1);
        let old_len = alloc::region(self.buf, stream::ELEMS)?.len();
        self.ensure_free(new_len.saturating_sub(old_len))?;
        alloc::resize(self.buf, stream::ELEMS, new_len)?;
        bits::insert(alloc::stream_mut(self.buf, stream::ELEMS)?, i, bit)
    }

    /// Overwrites the bit at leaf offset `i`.
    pub fn bits_set(&mut self, i: usize, bit: bool) -> Result<()> {
        bits::set(alloc::stream_mut(self.buf, stream::ELEMS)?, i, bit)
    }

    /// Inserts a branch entry at offset `i`.
    pub fn branch_insert(
        &mut self,
        i: usize,
        sep: Option<&[u8]>,
        child: NodeRef,
        summary: Summary,
    ) -> Result<()> {
        let mut need = 0usize;
        let sep_plan = if self.layout.has_separators() {
            let sep = sep.ok_or(BrambleError::Invalid("keyed branch entry requires separator"))?;
            let (len, delta) = self.vle_grown(stream::SEPARATORS, sep.len())?;
            need += delta;
            Some((len, sep))
        } else {
            None
        };
        let children_stream = self.layout.children_stream();
        let counts_stream = self.layout.counts_stream();
        let children = FseArray::parse(alloc::stream(self.buf, children_stream)?)?;
        let children_len = fse::encoded_len(8, children.size() + 1);
        need += children_len.saturating_sub(alloc::region(self.buf, children_stream)?.len());
        let (counts_len, counts_delta) = self.tree_grown(counts_stream)?;
        need += counts_delta;
        let ones_plan = if self.layout.tracks_ones() {
            let (len, delta) = self.tree_grown(stream::ONES)?;
            need += delta;
            Some(len)
        } else {
            None
        };
        self.ensure_free(need)?;

        if let Some((sep_len, sep)) = sep_plan {
            alloc::resize(self.buf, stream::SEPARATORS, sep_len)?;
            vle::insert(alloc::stream_mut(self.buf, stream::SEPARATORS)?, i, sep)?;
        }
        alloc::resize(self.buf, children_stream, children_len)?;
        fse::insert(
            alloc::stream_mut(self.buf, children_stream)?,
            i,
            &child.0.to_be_bytes(),
        )?;
        alloc::resize(self.buf, counts_stream, counts_len)?;
        fse_tree::insert(alloc::stream_mut(self.buf, counts_stream)?, i, summary.count)?;
        if let Some(ones_len) = ones_plan {
            alloc::resize(self.buf, stream::ONES, ones_len)?;
            fse_tree::insert(alloc::stream_mut(self.buf, stream::ONES)?, i, summary.ones)?;
        }
        Ok(())
    }

    /// Updates the cached summary of child `i`.
    pub fn branch_set_summary(&mut self, i: usize, summary: Summary) -> Result<()> {
        let counts_stream = self.layout.counts_stream();
        fse_tree::set_value(alloc::stream_mut(self.buf, counts_stream)?, i, summary.count)?;
        if self.layout.tracks_ones() {
            fse_tree::set_value(alloc::stream_mut(self.buf, stream::ONES)?, i, summary.ones)?;
        }
        Ok(())
    }

    /// Rebinds the child reference at offset `i`.
    pub fn branch_set_child(&mut self, i: usize, child: NodeRef) -> Result<()> {
        let children_stream = self.layout.children_stream();
        fse::set(
            alloc::stream_mut(self.buf, children_stream)?,
            i,
            &child.0.to_be_bytes(),
        )
    }

    /// Replaces the separator of child `i`.
    pub fn branch_set_separator(&mut self, i: usize, sep: &[u8]) -> Result<()> {
        if !self.layout.has_separators() {
            return Err(BrambleError::Invalid("branch carries no separators"));
        }
        let seps = VleArray::parse(alloc::stream(self.buf, stream::SEPARATORS)?)?;
        let old_len = seps.get(i)?.len();
        if sep.len() > old_len {
            let grow = sep.len() - old_len;
            let region_len = alloc::region(self.buf, stream::SEPARATORS)?.len();
            self.ensure_free(grow)?;
            alloc::resize(self.buf, stream::SEPARATORS, region_len + grow)?;
        }
        vle::set(alloc::stream_mut(self.buf, stream::SEPARATORS)?, i, sep)?;
        let seps = VleArray::parse(alloc::stream(self.buf, stream::SEPARATORS)?)?;
        let live = seps.encoded_len();
        alloc::resize(self.buf, stream::SEPARATORS, live)
    }

    /// Removes `count` entries starting at offset `start`, shrinking every
    /// affected stream region.
    pub fn remove_entries(&mut self, start: usize, count: usize) -> Result<()> {
        match self.layout {
            NodeLayout::KeyedLeaf => {
                self.vle_remove(stream::KEYS, start, count)?;
                self.vle_remove(stream::VALUES, start, count)
            }
            NodeLayout::SetLeaf => self.vle_remove(stream::KEYS, start, count),
            NodeLayout::SeqLeaf => {
                let region = alloc::stream_mut(self.buf, stream::ELEMS)?;
                fse::remove(region, start, count)?;
                let arr = FseArray::parse(alloc::stream(self.buf, stream::ELEMS)?)?;
                let live = arr.encoded_len();
                alloc::resize(self.buf, stream::ELEMS, live)
            }
            NodeLayout::BitsLeaf => {
                for _ in 0..count {
                    bits::remove(alloc::stream_mut(self.buf, stream::ELEMS)?, start)?;
                }
                let seq = BitSeq::parse(alloc::stream(self.buf, stream::ELEMS)?)?;
                let live = seq.encoded_len();
                alloc::resize(self.buf, stream::ELEMS, live)
            }
            NodeLayout::KeyedBranch | NodeLayout::SeqBranch | NodeLayout::BitsBranch => {
                if self.layout.has_separators() {
                    self.vle_remove(stream::SEPARATORS, start, count)?;
                }
                let children_stream = self.layout.children_stream();
                fse::remove(alloc::stream_mut(self.buf, children_stream)?, start, count)?;
                let arr = FseArray::parse(alloc::stream(self.buf, children_stream)?)?;
                let live = arr.encoded_len();
                alloc::resize(self.buf, children_stream, live)?;
                let counts_stream = self.layout.counts_stream();
                fse_tree::remove(alloc::stream_mut(self.buf, counts_stream)?, start, count)?;
                let tree = FseTree::parse(alloc::stream(self.buf, counts_stream)?)?;
                let live = tree.encoded_len();
                alloc::resize(self.buf, counts_stream, live)?;
                if self.layout.tracks_ones() {
                    fse_tree::remove(alloc::stream_mut(self.buf, stream::ONES)?, start, count)?;
                    let tree = FseTree::parse(alloc::stream(self.buf, stream::ONES)?)?;
                    let live = tree.encoded_len();
                    alloc::resize(self.buf, stream::ONES, live)?;
                }
                Ok(())
            }
        }
    }

    fn vle_remove(&mut self, stream_idx: usize, start: usize, count: usize) -> Result<()> {
        vle::remove(alloc::stream_mut(self.buf, stream_idx)?, start, count)?;
        let arr = VleArray::parse(alloc::stream(self.buf, stream_idx)?)?;
        let live = arr.encoded_len();
        alloc::resize(self.buf, stream_idx, live)
    }

    /// Inserts a layout-independent entry at offset `i`.
    pub fn insert_entry(&mut self, i: usize, entry: &Entry) -> Result<()> {
        match (self.layout, entry) {
            (NodeLayout::KeyedLeaf | NodeLayout::SetLeaf, Entry::Keyed { key, value }) => {
                self.keyed_insert(i, key, value)
            }
            (NodeLayout::SeqLeaf, Entry::Seq(elem)) => self.seq_insert(i, elem),
            (NodeLayout::BitsLeaf, Entry::Bit(bit)) => self.bits_insert(i, *bit),
            (
                NodeLayout::KeyedBranch | NodeLayout::SeqBranch | NodeLayout::BitsBranch,
                Entry::Branch { sep, child, summary },
            ) => self.branch_insert(i, sep.as_deref(), *child, *summary),
            _ => Err(BrambleError::Invalid("entry kind does not match node layout")),
        }
    }

    /// Appends a layout-independent entry.
    pub fn push_entry(&mut self, entry: &Entry) -> Result<()> {
        let at = self.entries()?;
        self.insert_entry(at, entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{init_branch, init_leaf};

    #[test]
    fn keyed_leaf_insert_and_search() -> Result<()> {
        let mut buf = vec![0u8; 512];
        init_leaf(&mut buf, NodeLayout::KeyedLeaf, 0)?;
        {
            let mut node = NodeViewMut::parse(&mut buf)?;
            node.keyed_insert(0, b"bb", b"2")?;
            node.keyed_insert(0, b"aa", b"1")?;
            node.keyed_insert(2, b"dd", b"4")?;
        }
        let view = NodeView::parse(&buf)?;
        assert_eq!(view.entries()?, 3);
        assert_eq!(view.key_at(1)?, b"bb");
        assert_eq!(view.value_at(2)?, b"4");
        assert_eq!(view.lower_bound(b"bb")?, (1, true));
        assert_eq!(view.lower_bound(b"cc")?, (2, false));
        assert_eq!(view.lower_bound(b"zz")?, (3, false));
        assert_eq!(view.max_key()?, Some(b"dd".to_vec()));
        assert_eq!(view.summary()?, Summary::of_count(3));
        Ok(())
    }

    #[test]
    fn branch_entries_track_summaries() -> Result<()> {
        let mut buf = vec![0u8; 512];
        init_branch(&mut buf, NodeLayout::KeyedBranch, 1)?;
        {
            let mut node = NodeViewMut::parse(&mut buf)?;
            node.branch_insert(0, Some(b"m".as_slice()), NodeRef(10), Summary::of_count(4))?;
            node.branch_insert(1, Some(b"z".as_slice()), NodeRef(11), Summary::of_count(6))?;
        }
        let view = NodeView::parse(&buf)?;
        assert_eq!(view.entries()?, 2);
        assert_eq!(view.child_ref(1)?, NodeRef(11));
        assert_eq!(view.child_summary(0)?.count, 4);
        assert_eq!(view.count_prefix(2)?, 10);
        assert_eq!(view.search_separators(b"a")?, 0);
        assert_eq!(view.search_separators(b"m")?, 0);
        assert_eq!(view.search_separators(b"n")?, 1);
        // Past every separator: clamp to the last child.
        assert_eq!(view.search_separators(b"zz")?, 1);
        assert_eq!(view.locate_count(5)?, Some((1, 4)));
        Ok(())
    }

    #[test]
    fn capacity_error_leaves_buffer_untouched() -> Result<()> {
        let mut buf = vec![0u8; 64];
        init_leaf(&mut buf, NodeLayout::KeyedLeaf, 0)?;
        {
            let mut node = NodeViewMut::parse(&mut buf)?;
            node.keyed_insert(0, b"k", b"v")?;
        }
        let before = buf.clone();
        {
            let mut node = NodeViewMut::parse(&mut buf)?;
            let err = node.keyed_insert(1, b"a-rather-long-key", b"a-rather-long-value").unwrap_err();
            assert!(matches!(err, BrambleError::CapacityExceeded(_)));
        }
        assert_eq!(buf, before);
        Ok(())
    }

    #[test]
    fn entry_roundtrip_between_nodes() -> Result<()> {
        let mut src = vec![0u8; 512];
        init_leaf(&mut src, NodeLayout::KeyedLeaf, 0)?;
        {
            let mut node = NodeViewMut::parse(&mut src)?;
            for (i, (k, v)) in [(b"a", b"1"), (b"b", b"2"), (b"c", b"3")].iter().enumerate() {
                node.keyed_insert(i, *k, *v)?;
            }
        }
        let entries = NodeView::parse(&src)?.take_range(1, 3)?;
        let mut dst = vec![0u8; 512];
        init_leaf(&mut dst, NodeLayout::KeyedLeaf, 0)?;
        {
            let mut node = NodeViewMut::parse(&mut dst)?;
            for entry in &entries {
                node.push_entry(entry)?;
            }
        }
        let view = NodeView::parse(&dst)?;
        assert_eq!(view.entries()?, 2);
        assert_eq!(view.key_at(0)?, b"b");
        assert_eq!(view.value_at(1)?, b"3");
        Ok(())
    }

    #[test]
    fn bits_leaf_summary_counts_ones() -> Result<()> {
        let mut buf = vec![0u8; 256];
        init_leaf(&mut buf, NodeLayout::BitsLeaf, 0)?;
        {
            let mut node = NodeViewMut::parse(&mut buf)?;
            for (i, bit) in [true, false, true, true].iter().enumerate() {
                node.bits_insert(i, *bit)?;
            }
        }
        let view = NodeView::parse(&buf)?;
        let summary = view.summary()?;
        assert_eq!(summary.count, 4);
        assert_eq!(summary.ones, 3);
        Ok(())
    }
}
