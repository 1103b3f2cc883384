//! Node model: one fixed-capacity buffer holding packed streams.
//!
//! A node is a packed allocator plus a type tag identifying which stream
//! layout it carries and whether it is a branch or a leaf. Branch streams
//! hold `(separator, child reference, child summary)` entries; leaf streams
//! hold the container's actual keys, values, elements or bits.

pub mod layout;
pub mod view;

pub use layout::{tag, NodeLayout};
pub use view::{Entry, NodeView, NodeViewMut};

use crate::error::{BrambleError, Result};
use crate::packed::alloc;
use crate::packed::{bits, fse, fse_tree, vle};

/// Initializes `buf` as an empty leaf of the given layout.
///
/// `elem_width` is only consulted for sequence leaves, where it fixes the
/// element width of the backing stream.
pub fn init_leaf(buf: &mut [u8], node_layout: NodeLayout, elem_width: u16) -> Result<()> {
    match node_layout {
        NodeLayout::KeyedLeaf => {
            alloc::init(buf, node_layout.tag(), 0, &[vle::EMPTY_LEN, vle::EMPTY_LEN])?;
            vle::init(alloc::stream_mut(buf, layout::stream::KEYS)?)?;
            vle::init(alloc::stream_mut(buf, layout::stream::VALUES)?)
        }
        NodeLayout::SetLeaf => {
            alloc::init(buf, node_layout.tag(), 0, &[vle::EMPTY_LEN])?;
            vle::init(alloc::stream_mut(buf, layout::stream::KEYS)?)
        }
        NodeLayout::SeqLeaf => {
            if elem_width == 0 {
                return Err(BrambleError::Invalid("sequence element width must be non-zero"));
            }
            alloc::init(buf, node_layout.tag(), 0, &[fse::encoded_len(elem_width as usize, 0)])?;
            fse::init(alloc::stream_mut(buf, layout::stream::ELEMS)?, elem_width)
        }
        NodeLayout::BitsLeaf => {
            alloc::init(buf, node_layout.tag(), 0, &[bits::encoded_len(0)])?;
            bits::init(alloc::stream_mut(buf, layout::stream::ELEMS)?)
        }
        _ => Err(BrambleError::Invalid("layout is not a leaf")),
    }
}

/// Initializes `buf` as an empty branch of the given layout at `level`.
pub fn init_branch(buf: &mut [u8], node_layout: NodeLayout, level: u8) -> Result<()> {
    if level == 0 {
        return Err(BrambleError::Invalid("branch level must be non-zero"));
    }
    match node_layout {
        NodeLayout::KeyedBranch => {
            alloc::init(
                buf,
                node_layout.tag(),
                level,
                &[vle::EMPTY_LEN, fse::encoded_len(8, 0), fse_tree::encoded_len(0)],
            )?;
            vle::init(alloc::stream_mut(buf, layout::stream::SEPARATORS)?)?;
            fse::init(alloc::stream_mut(buf, layout::stream::KEYED_CHILDREN)?, 8)?;
            fse_tree::init(alloc::stream_mut(buf, layout::stream::KEYED_COUNTS)?)
        }
        NodeLayout::SeqBranch => {
            alloc::init(
                buf,
                node_layout.tag(),
                level,
                &[fse::encoded_len(8, 0), fse_tree::encoded_len(0)],
            )?;
            fse::init(alloc::stream_mut(buf, layout::stream::PLAIN_CHILDREN)?, 8)?;
            fse_tree::init(alloc::stream_mut(buf, layout::stream::PLAIN_COUNTS)?)
        }
        NodeLayout::BitsBranch => {
            alloc::init(
                buf,
                node_layout.tag(),
                level,
                &[fse::encoded_len(8, 0), fse_tree::encoded_len(0), fse_tree::encoded_len(0)],
            )?;
            fse::init(alloc::stream_mut(buf, layout::stream::PLAIN_CHILDREN)?, 8)?;
            fse_tree::init(alloc::stream_mut(buf, layout::stream::PLAIN_COUNTS)?)?;
            fse_tree::init(alloc::stream_mut(buf, layout::stream::ONES)?)
        }
        _ => Err(BrambleError::Invalid("layout is not a branch")),
    }
}
