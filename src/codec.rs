//! Key and value codecs.
//!
//! Keys are stored in an order-preserving byte encoding so the tree can
//! compare entries without decoding them.

use std::cmp::Ordering;

use crate::error::{BrambleError, Result};

/// Trait implemented by key types storable in a keyed container.
pub trait KeyCodec: Sized {
    /// Encode `key` into `out` using the order-preserving representation.
    fn encode_key(key: &Self, out: &mut Vec<u8>);

    /// Compare two encoded keys.
    fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering;

    /// Decode a key from its encoded representation.
    fn decode_key(bytes: &[u8]) -> Result<Self>;
}

/// Trait implemented by value types storable in a keyed container.
pub trait ValCodec: Sized {
    /// Encode `value` into `out`.
    fn encode_val(value: &Self, out: &mut Vec<u8>);

    /// Decode a value from `src`.
    fn decode_val(src: &[u8]) -> Result<Self>;
}

/// Trait for constant-width elements stored in sequence containers.
pub trait FixedCodec: Sized {
    /// Serialized width in bytes.
    const WIDTH: usize;

    /// Encode `value` into exactly [`Self::WIDTH`] bytes appended to `out`.
    fn encode_fixed(value: &Self, out: &mut Vec<u8>);

    /// Decode a value from a `WIDTH`-byte slice.
    fn decode_fixed(src: &[u8]) -> Result<Self>;
}

impl KeyCodec for u64 {
    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&key.to_be_bytes());
    }

    fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 8 {
            return Err(BrambleError::Corruption("u64 key length mismatch"));
        }
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(arr))
    }
}

impl ValCodec for u64 {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        if src.len() != 8 {
            return Err(BrambleError::Corruption("u64 value length mismatch"));
        }
        let mut arr = [0u8; 8];
        arr.copy_from_slice(src);
        Ok(u64::from_be_bytes(arr))
    }
}

impl KeyCodec for Vec<u8> {
    fn encode_key(key: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(key);
    }

    fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn decode_key(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

impl ValCodec for Vec<u8> {
    fn encode_val(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(value);
    }

    fn decode_val(src: &[u8]) -> Result<Self> {
        Ok(src.to_vec())
    }
}

impl ValCodec for () {
    fn encode_val(_value: &Self, _out: &mut Vec<u8>) {}

    fn decode_val(src: &[u8]) -> Result<Self> {
        if !src.is_empty() {
            return Err(BrambleError::Corruption("unit value carries payload"));
        }
        Ok(())
    }
}

impl FixedCodec for u64 {
    const WIDTH: usize = 8;

    fn encode_fixed(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn decode_fixed(src: &[u8]) -> Result<Self> {
        if src.len() != 8 {
            return Err(BrambleError::Corruption("u64 element length mismatch"));
        }
        let mut arr = [0u8; 8];
        arr.copy_from_slice(src);
        Ok(u64::from_be_bytes(arr))
    }
}

impl FixedCodec for u32 {
    const WIDTH: usize = 4;

    fn encode_fixed(value: &Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_be_bytes());
    }

    fn decode_fixed(src: &[u8]) -> Result<Self> {
        if src.len() != 4 {
            return Err(BrambleError::Corruption("u32 element length mismatch"));
        }
        let mut arr = [0u8; 4];
        arr.copy_from_slice(src);
        Ok(u32::from_be_bytes(arr))
    }
}
