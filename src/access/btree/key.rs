//! Key comparison for the B+tree.
//!
//! Keys are fixed-width byte strings; the width is chosen per index at
//! construction. Ordering is supplied by a comparator rather than read off
//! the bytes, so a key encoding is free to be whatever the caller's type
//! needs as long as the comparator is a deterministic total order.

use std::cmp::Ordering;

pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Orders keys by the little-endian `i64` in their first eight bytes.
/// This is the comparator behind the integer file-driven test surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntComparator;

impl KeyComparator for IntComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        decode_i64(a).cmp(&decode_i64(b))
    }
}

/// Plain lexicographic byte order. Suitable for big-endian encoded keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesComparator;

impl KeyComparator for BytesComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Encode `value` into a key of `key_size` bytes, little-endian, zero
/// padded. `key_size` must be at least eight for the full range to order
/// correctly under `IntComparator`.
pub fn encode_i64(value: i64, key_size: usize) -> Vec<u8> {
    let mut key = vec![0u8; key_size];
    let bytes = value.to_le_bytes();
    let n = key_size.min(bytes.len());
    key[..n].copy_from_slice(&bytes[..n]);
    key
}

fn decode_i64(key: &[u8]) -> i64 {
    let mut bytes = [0u8; 8];
    let n = key.len().min(8);
    bytes[..n].copy_from_slice(&key[..n]);
    i64::from_le_bytes(bytes)
}
