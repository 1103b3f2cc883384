//! Variable-length-element array block.
//!
//! Elements are located through an offsets side-table (`size + 1` entries,
//! the last one marking the end of the data area), trading O(n) shifts on
//! insert for O(1) random access. Backs key, value and separator streams.
//!
//! Serialized layout: `[header][offsets: (size + 1) * 4][element bytes]`,
//! offsets relative to the start of the element area.

use crate::error::{BrambleError, Result};
use crate::packed::{format, parse_header, read_u32, write_header, write_u32, BLOCK_HDR_LEN};

/// Serialized length of a block holding `size` elements over `data_bytes`
/// total element bytes.
pub fn encoded_len(size: usize, data_bytes: usize) -> usize {
    BLOCK_HDR_LEN + (size + 1) * 4 + data_bytes
}

/// Smallest valid block: zero elements, one terminating offset.
pub const EMPTY_LEN: usize = BLOCK_HDR_LEN + 4;

/// Writes an empty block into `region`.
pub fn init(region: &mut [u8]) -> Result<()> {
    if region.len() < EMPTY_LEN {
        return Err(BrambleError::CapacityExceeded("vle region too small"));
    }
    write_header(region, format::VLE, 0, 0)?;
    write_u32(region, BLOCK_HDR_LEN, 0);
    Ok(())
}

fn offset_at(bytes: &[u8], k: usize) -> usize {
    read_u32(bytes, BLOCK_HDR_LEN + k * 4) as usize
}

fn data_start(size: usize) -> usize {
    BLOCK_HDR_LEN + (size + 1) * 4
}

/// Read-only view over a variable-length-element block.
#[derive(Clone, Copy)]
pub struct VleArray<'a> {
    bytes: &'a [u8],
    size: usize,
}

impl<'a> VleArray<'a> {
    /// Parses a block from its serialized bytes.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let (_aux, size) = parse_header(bytes, format::VLE)?;
        if bytes.len() < data_start(size) {
            return Err(BrambleError::Corruption("vle offsets table truncated"));
        }
        let total = offset_at(bytes, size);
        if bytes.len() < data_start(size) + total {
            return Err(BrambleError::Corruption("vle data area truncated"));
        }
        Ok(Self { bytes, size })
    }

    /// Number of elements stored.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Total element bytes (excluding header and offsets).
    pub fn data_len(&self) -> usize {
        offset_at(self.bytes, self.size)
    }

    /// Serialized length of the live content.
    pub fn encoded_len(&self) -> usize {
        encoded_len(self.size, self.data_len())
    }

    /// Returns element `i`.
    pub fn get(&self, i: usize) -> Result<&'a [u8]> {
        if i >= self.size {
            return Err(BrambleError::OutOfBounds {
                index: i as u64,
                len: self.size as u64,
            });
        }
        let start = offset_at(self.bytes, i);
        let end = offset_at(self.bytes, i + 1);
        if start > end {
            return Err(BrambleError::Corruption("vle offsets not monotonic"));
        }
        let base = data_start(self.size);
        Ok(&self.bytes[base + start..base + end])
    }

    /// Iterates over all elements in order.
    pub fn iter(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        (0..self.size).map(move |i| {
            let start = offset_at(self.bytes, i);
            let end = offset_at(self.bytes, i + 1);
            let base = data_start(self.size);
            &self.bytes[base + start..base + end]
        })
    }
}

fn parse_mut(region: &[u8]) -> Result<usize> {
    let (_aux, size) = parse_header(region, format::VLE)?;
    if region.len() < data_start(size) {
        return Err(BrambleError::Corruption("vle offsets table truncated"));
    }
    Ok(size)
}

/// Inserts `elem` at `index`, shifting the offsets table and data tail.
///
/// The region must already hold the grown encoding; callers resize through
/// the packed allocator first.
pub fn insert(region: &mut [u8], index: usize, elem: &[u8]) -> Result<()> {
    let size = parse_mut(region)?;
    if index > size {
        return Err(BrambleError::OutOfBounds {
            index: index as u64,
            len: size as u64,
        });
    }
    let total = offset_at(region, size);
    if region.len() < encoded_len(size + 1, total + elem.len()) {
        return Err(BrambleError::CapacityExceeded("vle region too small"));
    }
    let pos = offset_at(region, index);
    let old_base = data_start(size);
    let new_base = data_start(size + 1);

    // Move data right: suffix first, then prefix, so neither move clobbers
    // the other's source bytes.
    region.copy_within(old_base + pos..old_base + total, new_base + pos + elem.len());
    region.copy_within(old_base..old_base + pos, new_base);
    region[new_base + pos..new_base + pos + elem.len()].copy_from_slice(elem);

    // Rewrite the offsets table back-to-front so untouched entries survive.
    for k in (index + 1..=size + 1).rev() {
        let shifted = offset_at(region, k - 1) + elem.len();
        write_u32(region, BLOCK_HDR_LEN + k * 4, shifted as u32);
    }
    write_header(region, format::VLE, 0, size + 1)
}

/// Removes `count` elements starting at `index`.
pub fn remove(region: &mut [u8], index: usize, count: usize) -> Result<()> {
    let size = parse_mut(region)?;
    if index + count > size {
        return Err(BrambleError::OutOfBounds {
            index: (index + count) as u64,
            len: size as u64,
        });
    }
    let total = offset_at(region, size);
    let start = offset_at(region, index);
    let end = offset_at(region, index + count);
    let removed = end - start;
    let old_base = data_start(size);
    let new_size = size - count;
    let new_base = data_start(new_size);

    // Both chunks move left; left-to-right order keeps sources intact.
    region.copy_within(old_base..old_base + start, new_base);
    region.copy_within(old_base + end..old_base + total, new_base + start);

    for k in index + 1..=new_size {
        let shifted = offset_at(region, k + count) - removed;
        write_u32(region, BLOCK_HDR_LEN + k * 4, shifted as u32);
    }
    write_header(region, format::VLE, 0, new_size)?;
    let live = encoded_len(new_size, total - removed);
    region[live..].fill(0);
    Ok(())
}

/// Replaces element `index` with `elem`, shifting the data tail by the
/// length difference.
pub fn set(region: &mut [u8], index: usize, elem: &[u8]) -> Result<()> {
    let size = parse_mut(region)?;
    if index >= size {
        return Err(BrambleError::OutOfBounds {
            index: index as u64,
            len: size as u64,
        });
    }
    let total = offset_at(region, size);
    let start = offset_at(region, index);
    let end = offset_at(region, index + 1);
    let old_len = end - start;
    if elem.len() > old_len {
        let grow = elem.len() - old_len;
        if region.len() < encoded_len(size, total + grow) {
            return Err(BrambleError::CapacityExceeded("vle region too small"));
        }
    }
    let base = data_start(size);
    region.copy_within(base + end..base + total, base + start + elem.len());
    region[base + start..base + start + elem.len()].copy_from_slice(elem);
    if elem.len() != old_len {
        for k in index + 1..=size {
            let old = offset_at(region, k);
            let adjusted = old + elem.len() - old_len;
            write_u32(region, BLOCK_HDR_LEN + k * 4, adjusted as u32);
        }
    }
    if elem.len() < old_len {
        let live = encoded_len(size, total - (old_len - elem.len()));
        region[live..].fill(0);
    }
    Ok(())
}
