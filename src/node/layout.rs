//! Runtime node-type dispatch.
//!
//! The set of packed-stream layouts is closed and known at build time, so
//! dispatch is an exhaustive enum match over the type tag rather than open
//! virtual dispatch. An unrecognized tag means the persisted bytes are
//! damaged and surfaces [`BrambleError::UnknownNodeType`].

use crate::error::{BrambleError, Result};

/// Tag values persisted in node headers.
pub mod tag {
    /// Leaf with key and value streams (Map, MultiMap).
    pub const KEYED_LEAF: u32 = 1;
    /// Branch with separator, child-ref and count streams.
    pub const KEYED_BRANCH: u32 = 2;
    /// Leaf with a key stream only (Set).
    pub const SET_LEAF: u32 = 3;
    /// Leaf with a fixed-width element stream (Sequence).
    pub const SEQ_LEAF: u32 = 4;
    /// Branch with child-ref and count streams.
    pub const SEQ_BRANCH: u32 = 5;
    /// Leaf with a bit-sequence stream.
    pub const BITS_LEAF: u32 = 6;
    /// Branch with child-ref, count and set-bit-count streams.
    pub const BITS_BRANCH: u32 = 7;
}

/// The closed set of node shapes the engine understands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeLayout {
    /// Key/value leaf.
    KeyedLeaf,
    /// Branch over keyed leaves.
    KeyedBranch,
    /// Key-only leaf.
    SetLeaf,
    /// Fixed-width element leaf.
    SeqLeaf,
    /// Branch over sequence leaves.
    SeqBranch,
    /// Bit-sequence leaf.
    BitsLeaf,
    /// Branch over bit-sequence leaves.
    BitsBranch,
}

impl NodeLayout {
    /// Resolves a persisted type tag.
    pub fn from_tag(tag_value: u32) -> Result<Self> {
        match tag_value {
            tag::KEYED_LEAF => Ok(Self::KeyedLeaf),
            tag::KEYED_BRANCH => Ok(Self::KeyedBranch),
            tag::SET_LEAF => Ok(Self::SetLeaf),
            tag::SEQ_LEAF => Ok(Self::SeqLeaf),
            tag::SEQ_BRANCH => Ok(Self::SeqBranch),
            tag::BITS_LEAF => Ok(Self::BitsLeaf),
            tag::BITS_BRANCH => Ok(Self::BitsBranch),
            other => Err(BrambleError::UnknownNodeType(other)),
        }
    }

    /// The persisted tag for this layout.
    pub fn tag(self) -> u32 {
        match self {
            Self::KeyedLeaf => tag::KEYED_LEAF,
            Self::KeyedBranch => tag::KEYED_BRANCH,
            Self::SetLeaf => tag::SET_LEAF,
            Self::SeqLeaf => tag::SEQ_LEAF,
            Self::SeqBranch => tag::SEQ_BRANCH,
            Self::BitsLeaf => tag::BITS_LEAF,
            Self::BitsBranch => tag::BITS_BRANCH,
        }
    }

    /// Whether this layout describes a leaf.
    pub fn is_leaf(self) -> bool {
        matches!(self, Self::KeyedLeaf | Self::SetLeaf | Self::SeqLeaf | Self::BitsLeaf)
    }

    /// The branch layout used above this layout's subtrees.
    pub fn branch_layout(self) -> NodeLayout {
        match self {
            Self::KeyedLeaf | Self::SetLeaf | Self::KeyedBranch => Self::KeyedBranch,
            Self::SeqLeaf | Self::SeqBranch => Self::SeqBranch,
            Self::BitsLeaf | Self::BitsBranch => Self::BitsBranch,
        }
    }

    /// Whether branch entries carry separator keys.
    pub fn has_separators(self) -> bool {
        matches!(self, Self::KeyedBranch)
    }

    /// Whether summaries track set-bit counts.
    pub fn tracks_ones(self) -> bool {
        matches!(self, Self::BitsLeaf | Self::BitsBranch)
    }

    /// Number of stream regions for this layout.
    pub fn stream_count(self) -> usize {
        match self {
            Self::KeyedLeaf => 2,
            Self::KeyedBranch => 3,
            Self::SetLeaf => 1,
            Self::SeqLeaf => 1,
            Self::SeqBranch => 2,
            Self::BitsLeaf => 1,
            Self::BitsBranch => 3,
        }
    }
}

/// Stream indexes per layout family.
pub mod stream {
    /// Keyed leaf: keys.
    pub const KEYS: usize = 0;
    /// Keyed leaf: values.
    pub const VALUES: usize = 1;
    /// Keyed branch: separators.
    pub const SEPARATORS: usize = 0;
    /// Keyed branch: child references.
    pub const KEYED_CHILDREN: usize = 1;
    /// Keyed branch: child entry counts.
    pub const KEYED_COUNTS: usize = 2;
    /// Sequence leaf: elements. Bits leaf: bits.
    pub const ELEMS: usize = 0;
    /// Sequence/bits branch: child references.
    pub const PLAIN_CHILDREN: usize = 0;
    /// Sequence/bits branch: child entry counts.
    pub const PLAIN_COUNTS: usize = 1;
    /// Bits branch: child set-bit counts.
    pub const ONES: usize = 2;
}

impl NodeLayout {
    /// Stream index of the child-reference block (branches only).
    pub fn children_stream(self) -> usize {
        match self {
            Self::KeyedBranch => stream::KEYED_CHILDREN,
            _ => stream::PLAIN_CHILDREN,
        }
    }

    /// Stream index of the child-count block (branches only).
    pub fn counts_stream(self) -> usize {
        match self {
            Self::KeyedBranch => stream::KEYED_COUNTS,
            _ => stream::PLAIN_COUNTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrip_is_exhaustive() {
        for layout in [
            NodeLayout::KeyedLeaf,
            NodeLayout::KeyedBranch,
            NodeLayout::SetLeaf,
            NodeLayout::SeqLeaf,
            NodeLayout::SeqBranch,
            NodeLayout::BitsLeaf,
            NodeLayout::BitsBranch,
        ] {
            assert_eq!(NodeLayout::from_tag(layout.tag()).expect("known tag"), layout);
        }
    }

    #[test]
    fn unknown_tag_is_corruption_class_error() {
        let err = NodeLayout::from_tag(99).unwrap_err();
        assert!(matches!(err, BrambleError::UnknownNodeType(99)));
    }
}
