//! Packed blocks: pointer-free binary codecs for ordered collections.
//!
//! A packed block encodes one homogeneous collection inside a byte region.
//! Blocks are relocatable (only relative offsets) and fully reconstructible
//! from their bytes. Every block starts with the same self-describing
//! header: `[format_id: u16][aux: u16][size: u32]`, big-endian.
//!
//! The indexed variants ([`fse_tree`], [`bits`]) embed a multi-level sum
//! index so prefix-sum and rank/select queries resolve in O(log n) without
//! touching most of the element bytes.

pub mod alloc;
pub mod bits;
pub mod fse;
pub mod fse_tree;
pub mod vle;

/// Length of the common block header.
pub const BLOCK_HDR_LEN: usize = 8;

/// Branching factor of the embedded summary indexes.
pub const INDEX_BRANCHING: usize = 32;

/// Format identifiers stored in the first header field.
pub mod format {
    /// Fixed-size-element array, no index.
    pub const FSE: u16 = 1;
    /// Fixed-size integer tree with sum index.
    pub const FSE_TREE: u16 = 2;
    /// Variable-length-element array with offsets table.
    pub const VLE: u16 = 3;
    /// Bit sequence with popcount index.
    pub const BITS: u16 = 4;
}

use crate::error::{BrambleError, Result};

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    let mut arr = [0u8; 2];
    arr.copy_from_slice(&buf[offset..offset + 2]);
    u16::from_be_bytes(arr)
}

pub(crate) fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(arr)
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(arr)
}

pub(crate) fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}

/// Parses the common block header, checking the expected format id.
pub(crate) fn parse_header(bytes: &[u8], expect_format: u16) -> Result<(u16, usize)> {
    if bytes.len() < BLOCK_HDR_LEN {
        return Err(BrambleError::Corruption("packed block shorter than header"));
    }
    let fmt = read_u16(bytes, 0);
    if fmt != expect_format {
        return Err(BrambleError::Corruption("packed block format mismatch"));
    }
    let aux = read_u16(bytes, 2);
    let size = read_u32(bytes, 4) as usize;
    Ok((aux, size))
}

/// Writes the common block header.
pub(crate) fn write_header(bytes: &mut [u8], format: u16, aux: u16, size: usize) -> Result<()> {
    if bytes.len() < BLOCK_HDR_LEN {
        return Err(BrambleError::CapacityExceeded("region too small for block header"));
    }
    let size_u32 =
        u32::try_from(size).map_err(|_| BrambleError::AggregateOverflow("block size exceeds u32"))?;
    write_u16(bytes, 0, format);
    write_u16(bytes, 2, aux);
    write_u32(bytes, 4, size_u32);
    Ok(())
}
