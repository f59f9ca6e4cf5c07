//! Key/Blob model
//!
//! Identifier and metadata types shared by every backend.

use std::fmt;
use std::ops::Range;

use crate::error::{BlobError, Result};

/// A caller-supplied 64-bit blob identifier.
///
/// Keys are opaque: the engine never hashes or validates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(pub u64);

impl Key {
    /// Width of the hexadecimal file name used by the local-filesystem backend
    pub const HEX_WIDTH: usize = 16;

    /// Fixed-width lowercase hex encoding ("000000000000002a" for 42)
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    /// Parse a fixed-width hex name back into a key
    ///
    /// Returns None for anything that is not exactly 16 lowercase hex digits,
    /// so temp files and foreign files are never mistaken for keys.
    pub fn from_hex(name: &str) -> Option<Self> {
        if name.len() != Self::HEX_WIDTH {
            return None;
        }
        if !name.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return None;
        }
        u64::from_str_radix(name, 16).ok().map(Key)
    }
}

impl From<u64> for Key {
    fn from(value: u64) -> Self {
        Key(value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key {:#018x}", self.0)
    }
}

/// Metadata about a stored blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobMeta {
    /// Blob length in bytes
    pub size: u64,
}

/// A byte range within one blob
pub type BlobRange = Range<u64>;

/// Validate that `[offset, offset + len)` lies within a blob of `size` bytes
///
/// Overflowing ranges are reported as `OutOfRange` rather than wrapping.
pub fn checked_range(key: Key, offset: u64, len: u64, size: u64) -> Result<BlobRange> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(offset..end),
        _ => Err(BlobError::OutOfRange {
            key,
            offset,
            len,
            size,
        }),
    }
}
