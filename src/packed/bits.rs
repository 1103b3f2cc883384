//! Bit sequence block with rank/select support.
//!
//! Bits are packed LSB-first into `u64` words; an embedded multi-level
//! popcount index (same shape as the [`super::fse_tree`] sum index, built
//! over per-word popcounts) resolves `rank` and `select` in O(log n).
//! Unused high bits of the final word are kept zero.
//!
//! `select(k, symbol)` uses lower-bound semantics: the position of the
//! `k + 1`-th occurrence of `symbol`, i.e. the first position whose
//! cumulative symbol count reaches `k + 1`.

use smallvec::SmallVec;

use crate::error::{BrambleError, Result};
use crate::packed::{
    format, parse_header, read_u64, write_header, write_u64, BLOCK_HDR_LEN, INDEX_BRANCHING,
};

type Levels = SmallVec<[usize; 6]>;

fn word_count(bits: usize) -> usize {
    bits.div_ceil(64)
}

fn level_counts(words: usize) -> Levels {
    let mut levels = Levels::new();
    if words == 0 {
        return levels;
    }
    let mut n = words.div_ceil(INDEX_BRANCHING);
    levels.push(n);
    while n > 1 {
        n = n.div_ceil(INDEX_BRANCHING);
        levels.push(n);
    }
    levels
}

fn index_entries(words: usize) -> usize {
    level_counts(words).iter().sum()
}

/// Serialized length of a sequence holding `bits` bits.
pub fn encoded_len(bits: usize) -> usize {
    let words = word_count(bits);
    BLOCK_HDR_LEN + words * 8 + index_entries(words) * 8
}

fn word_at(bytes: &[u8], w: usize) -> u64 {
    read_u64(bytes, BLOCK_HDR_LEN + w * 8)
}

fn set_word(bytes: &mut [u8], w: usize, value: u64) {
    write_u64(bytes, BLOCK_HDR_LEN + w * 8, value);
}

fn level_start(words: usize, levels: &Levels, level: usize) -> usize {
    let mut start = BLOCK_HDR_LEN + words * 8;
    for l in levels.iter().take(level) {
        start += l * 8;
    }
    start
}

fn entry_at(bytes: &[u8], words: usize, levels: &Levels, level: usize, j: usize) -> u64 {
    read_u64(bytes, level_start(words, levels, level) + j * 8)
}

fn low_mask(bits: usize) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Writes an empty sequence into `region`.
pub fn init(region: &mut [u8]) -> Result<()> {
    write_header(region, format::BITS, 0, 0)
}

/// Read-only view over a bit sequence block.
#[derive(Clone, Copy)]
pub struct BitSeq<'a> {
    bytes: &'a [u8],
    size: usize,
}

impl<'a> BitSeq<'a> {
    /// Parses a sequence from its serialized bytes.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let (_aux, size) = parse_header(bytes, format::BITS)?;
        if bytes.len() < encoded_len(size) {
            return Err(BrambleError::Corruption("bit sequence block truncated"));
        }
        Ok(Self { bytes, size })
    }

    /// Number of bits stored.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Serialized length of the live content.
    pub fn encoded_len(&self) -> usize {
        encoded_len(self.size)
    }

    /// Returns bit `i`.
    pub fn get(&self, i: usize) -> Result<bool> {
        if i >= self.size {
            return Err(BrambleError::OutOfBounds {
                index: i as u64,
                len: self.size as u64,
            });
        }
        Ok((word_at(self.bytes, i / 64) >> (i % 64)) & 1 == 1)
    }

    /// Total set bits, read from the index top.
    pub fn count_ones(&self) -> u64 {
        let words = word_count(self.size);
        let levels = level_counts(words);
        match levels.len() {
            0 => 0,
            n => entry_at(self.bytes, words, &levels, n - 1, 0),
        }
    }

    /// Total occurrences of `symbol`.
    pub fn count(&self, symbol: bool) -> u64 {
        let ones = self.count_ones();
        if symbol {
            ones
        } else {
            self.size as u64 - ones
        }
    }

    fn ones_before_word(&self, w: usize) -> u64 {
        let words = word_count(self.size);
        let levels = level_counts(words);
        let mut acc: u64 = 0;
        let group_start = (w / INDEX_BRANCHING) * INDEX_BRANCHING;
        for j in group_start..w {
            acc += u64::from(word_at(self.bytes, j).count_ones());
        }
        let mut idx = w / INDEX_BRANCHING;
        for level in 0..levels.len() {
            if idx == 0 {
                break;
            }
            let group_start = (idx / INDEX_BRANCHING) * INDEX_BRANCHING;
            for j in group_start..idx {
                acc += entry_at(self.bytes, words, &levels, level, j);
            }
            idx /= INDEX_BRANCHING;
        }
        acc
    }

    /// Occurrences of `symbol` in positions `[0, i)`.
    pub fn rank(&self, i: usize, symbol: bool) -> Result<u64> {
        if i > self.size {
            return Err(BrambleError::OutOfBounds {
                index: i as u64,
                len: self.size as u64,
            });
        }
        let w = i / 64;
        let b = i % 64;
        let mut ones = self.ones_before_word(w);
        if b > 0 {
            ones += u64::from((word_at(self.bytes, w) & low_mask(b)).count_ones());
        }
        Ok(if symbol { ones } else { i as u64 - ones })
    }

    fn entry_bits(&self, level: usize, j: usize) -> u64 {
        let span_words = INDEX_BRANCHING.pow(level as u32 + 1);
        let base_bits = j * span_words * 64;
        (self.size.saturating_sub(base_bits)).min(span_words * 64) as u64
    }

    /// Position of the `k + 1`-th occurrence of `symbol`, or `None` when the
    /// sequence holds fewer occurrences.
    pub fn select(&self, k: u64, symbol: bool) -> Result<Option<u64>> {
        if k >= self.count(symbol) {
            return Ok(None);
        }
        let words = word_count(self.size);
        let levels = level_counts(words);
        let mut acc: u64 = 0;
        let mut child_base = 0usize;
        for level in (0..levels.len()).rev() {
            let end = (child_base + INDEX_BRANCHING).min(levels[level]);
            let mut descended = false;
            for j in child_base..end {
                let ones = entry_at(self.bytes, words, &levels, level, j);
                let weight = if symbol {
                    ones
                } else {
                    self.entry_bits(level, j) - ones
                };
                if acc + weight > k {
                    child_base = j * INDEX_BRANCHING;
                    descended = true;
                    break;
                }
                acc += weight;
            }
            if !descended {
                return Err(BrambleError::Corruption("bit sequence index inconsistent"));
            }
        }
        let end = (child_base + INDEX_BRANCHING).min(words);
        for w in child_base..end {
            let word = word_at(self.bytes, w);
            let valid = (self.size - w * 64).min(64);
            let matching = if symbol { word } else { !word & low_mask(valid) };
            let weight = u64::from(matching.count_ones());
            if acc + weight > k {
                let mut remaining = matching;
                for _ in 0..(k - acc) {
                    remaining &= remaining - 1;
                }
                return Ok(Some((w * 64) as u64 + u64::from(remaining.trailing_zeros())));
            }
            acc += weight;
        }
        Err(BrambleError::Corruption("bit sequence index inconsistent"))
    }

    /// Collects all bits; test support.
    pub fn to_bools(&self) -> Vec<bool> {
        (0..self.size)
            .map(|i| (word_at(self.bytes, i / 64) >> (i % 64)) & 1 == 1)
            .collect()
    }
}

fn parse_size(region: &[u8]) -> Result<usize> {
    let (_aux, size) = parse_header(region, format::BITS)?;
    Ok(size)
}

fn rebuild_index(region: &mut [u8], bits: usize) {
    let words = word_count(bits);
    let levels = level_counts(words);
    for level in 0..levels.len() {
        let child_count = if level == 0 { words } else { levels[level - 1] };
        for j in 0..levels[level] {
            let start = j * INDEX_BRANCHING;
            let end = (start + INDEX_BRANCHING).min(child_count);
            let mut sum: u64 = 0;
            for c in start..end {
                sum += if level == 0 {
                    u64::from(word_at(region, c).count_ones())
                } else {
                    entry_at(region, words, &levels, level - 1, c)
                };
            }
            let at = level_start(words, &levels, level) + j * 8;
            write_u64(region, at, sum);
        }
    }
}

/// Inserts `bit` at position `i`, shifting the tail up by one.
pub fn insert(region: &mut [u8], i: usize, bit: bool) -> Result<()> {
    let size = parse_size(region)?;
    if i > size {
        return Err(BrambleError::OutOfBounds {
            index: i as u64,
            len: size as u64,
        });
    }
    let new_size = size + 1;
    if region.len() < encoded_len(new_size) {
        return Err(BrambleError::CapacityExceeded("bit sequence region too small"));
    }
    let old_words = word_count(size);
    let new_words = word_count(new_size);
    if new_words > old_words {
        // The fresh word slot previously held index bytes.
        set_word(region, new_words - 1, 0);
    }
    let wi = i / 64;
    let b = i % 64;
    let mask = low_mask(b);
    let word = word_at(region, wi);
    let mut carry = word >> 63;
    let shifted = (word & mask) | ((word & !mask) << 1) | (u64::from(bit) << b);
    set_word(region, wi, shifted);
    for w in wi + 1..new_words {
        let word = word_at(region, w);
        let next_carry = word >> 63;
        set_word(region, w, (word << 1) | carry);
        carry = next_carry;
    }
    write_header(region, format::BITS, 0, new_size)?;
    rebuild_index(region, new_size);
    let live = encoded_len(new_size);
    region[live..].fill(0);
    Ok(())
}

/// Appends `bit` at the end.
pub fn push(region: &mut [u8], bit: bool) -> Result<()> {
    let size = parse_size(region)?;
    insert(region, size, bit)
}

/// Removes the bit at position `i`, shifting the tail down by one.
pub fn remove(region: &mut [u8], i: usize) -> Result<()> {
    let size = parse_size(region)?;
    if i >= size {
        return Err(BrambleError::OutOfBounds {
            index: i as u64,
            len: size as u64,
        });
    }
    let old_words = word_count(size);
    let wi = i / 64;
    let b = i % 64;
    let mask = low_mask(b);
    let word = word_at(region, wi);
    let mut merged = (word & mask) | ((word >> 1) & !mask);
    for w in wi + 1..old_words {
        let next = word_at(region, w);
        merged |= (next & 1) << 63;
        set_word(region, w - 1, merged);
        merged = next >> 1;
    }
    set_word(region, old_words - 1, merged);
    let new_size = size - 1;
    write_header(region, format::BITS, 0, new_size)?;
    rebuild_index(region, new_size);
    let live = encoded_len(new_size);
    region[live..].fill(0);
    Ok(())
}

/// Overwrites bit `i`, recomputing only the index groups above its word.
pub fn set(region: &mut [u8], i: usize, bit: bool) -> Result<()> {
    let size = parse_size(region)?;
    if i >= size {
        return Err(BrambleError::OutOfBounds {
            index: i as u64,
            len: size as u64,
        });
    }
    let wi = i / 64;
    let word = word_at(region, wi);
    let updated = if bit {
        word | (1u64 << (i % 64))
    } else {
        word & !(1u64 << (i % 64))
    };
    if updated == word {
        return Ok(());
    }
    set_word(region, wi, updated);
    let words = word_count(size);
    let levels = level_counts(words);
    let mut g = wi / INDEX_BRANCHING;
    for level in 0..levels.len() {
        let child_count = if level == 0 { words } else { levels[level - 1] };
        let start = g * INDEX_BRANCHING;
        let end = (start + INDEX_BRANCHING).min(child_count);
        let mut sum: u64 = 0;
        for c in start..end {
            sum += if level == 0 {
                u64::from(word_at(region, c).count_ones())
            } else {
                entry_at(region, words, &levels, level - 1, c)
            };
        }
        let at = level_start(words, &levels, level) + g * 8;
        write_u64(region, at, sum);
        g /= INDEX_BRANCHING;
    }
    Ok(())
}
