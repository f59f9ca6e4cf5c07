//! On-disk headers for the memory-mapped backend
//!
//! Both headers are bincode-encoded (fixed-width little-endian integers, no
//! padding) and carry a CRC32 over their own fields.

use serde::{Deserialize, Serialize};

use crate::error::{BlobError, Result};

/// Magic bytes identifying a blobstore backing file
pub(crate) const FILE_MAGIC: [u8; 8] = *b"BLOBMMAP";

/// Current backing file format version
pub(crate) const FORMAT_VERSION: u32 = 1;

/// Encoded file header size: Magic (8) + Version (4) + Flags (4) + ArenaEnd (8) + CRC (4)
pub(crate) const FILE_HEADER_SIZE: usize = 28;

/// Bytes reserved for the file header; the arena starts here
pub(crate) const ARENA_START: u64 = 4096;

/// Magic tag at the start of every block header ("BLK1")
pub(crate) const BLOCK_MAGIC: u32 = u32::from_le_bytes(*b"BLK1");

/// Encoded block header size:
/// Magic (4) + State (4) + Key (8) + Len (8) + Cap (8) + CRC (4) + PayloadCRC (4)
pub(crate) const BLOCK_HEADER_SIZE: u64 = 40;

/// Payload capacities are multiples of this
pub(crate) const BLOCK_ALIGN: u64 = 8;

/// Round a payload length up to the block alignment
pub(crate) fn align_cap(len: u64) -> u64 {
    (len + BLOCK_ALIGN - 1) & !(BLOCK_ALIGN - 1)
}

// =============================================================================
// File Header
// =============================================================================

/// Header stored at offset 0 of the backing file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct FileHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub flags: u32,
    /// End of the last block; everything past it is unused
    pub arena_end: u64,
    pub crc: u32,
}

impl FileHeader {
    pub(crate) fn new(arena_end: u64) -> Self {
        let mut header = Self {
            magic: FILE_MAGIC,
            version: FORMAT_VERSION,
            flags: 0,
            arena_end,
            crc: 0,
        };
        header.crc = header.compute_crc();
        header
    }

    fn compute_crc(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.magic);
        hasher.update(&self.version.to_le_bytes());
        hasher.update(&self.flags.to_le_bytes());
        hasher.update(&self.arena_end.to_le_bytes());
        hasher.finalize()
    }

    pub(crate) fn encode(&self) -> Result<[u8; FILE_HEADER_SIZE]> {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        bincode::serialize_into(&mut buf[..], self)
            .map_err(|e| BlobError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Decode and validate magic, version and checksum
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FILE_HEADER_SIZE {
            return Err(BlobError::Corruption(format!(
                "file header truncated: {} bytes",
                bytes.len()
            )));
        }

        let header: FileHeader = bincode::deserialize(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| BlobError::Corruption(format!("unreadable file header: {}", e)))?;

        if header.magic != FILE_MAGIC {
            return Err(BlobError::Corruption(format!(
                "invalid file magic: expected {:?}, got {:?}",
                FILE_MAGIC, header.magic
            )));
        }
        if header.version != FORMAT_VERSION {
            return Err(BlobError::Corruption(format!(
                "unsupported format version: {}",
                header.version
            )));
        }
        let expected = header.compute_crc();
        if header.crc != expected {
            return Err(BlobError::Corruption(format!(
                "file header checksum mismatch: expected 0x{:08x}, got 0x{:08x}",
                expected, header.crc
            )));
        }

        Ok(header)
    }
}

// =============================================================================
// Block Header
// =============================================================================

/// Whether a block holds a blob or is free space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockState {
    Live,
    Free,
}

impl BlockState {
    fn as_u32(self) -> u32 {
        match self {
            BlockState::Live => 1,
            BlockState::Free => 2,
        }
    }

    fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(BlockState::Live),
            2 => Some(BlockState::Free),
            _ => None,
        }
    }
}

/// Header preceding every block in the arena
///
/// A block spans `BLOCK_HEADER_SIZE + cap` bytes. Live blocks store `len`
/// payload bytes right after the header; free blocks have `len == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct BlockHeader {
    pub magic: u32,
    pub state: u32,
    pub key: u64,
    pub len: u64,
    pub cap: u64,
    pub crc: u32,
    pub payload_crc: u32,
}

impl BlockHeader {
    pub(crate) fn live(key: u64, len: u64, cap: u64, payload_crc: u32) -> Self {
        Self::sealed(BlockState::Live, key, len, cap, payload_crc)
    }

    pub(crate) fn free(cap: u64) -> Self {
        Self::sealed(BlockState::Free, 0, 0, cap, 0)
    }

    fn sealed(state: BlockState, key: u64, len: u64, cap: u64, payload_crc: u32) -> Self {
        let mut header = Self {
            magic: BLOCK_MAGIC,
            state: state.as_u32(),
            key,
            len,
            cap,
            crc: 0,
            payload_crc,
        };
        header.crc = header.compute_crc();
        header
    }

    fn compute_crc(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.magic.to_le_bytes());
        hasher.update(&self.state.to_le_bytes());
        hasher.update(&self.key.to_le_bytes());
        hasher.update(&self.len.to_le_bytes());
        hasher.update(&self.cap.to_le_bytes());
        hasher.update(&self.payload_crc.to_le_bytes());
        hasher.finalize()
    }

    /// Decoded state; only valid on headers returned by `decode`
    pub(crate) fn block_state(&self) -> BlockState {
        BlockState::from_u32(self.state).unwrap_or(BlockState::Free)
    }

    pub(crate) fn encode(&self) -> Result<[u8; BLOCK_HEADER_SIZE as usize]> {
        let mut buf = [0u8; BLOCK_HEADER_SIZE as usize];
        bincode::serialize_into(&mut buf[..], self)
            .map_err(|e| BlobError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Decode and validate the header found at arena offset `offset`
    pub(crate) fn decode(bytes: &[u8], offset: u64) -> Result<Self> {
        if bytes.len() < BLOCK_HEADER_SIZE as usize {
            return Err(BlobError::Corruption(format!(
                "block header at offset {} truncated",
                offset
            )));
        }

        let header: BlockHeader = bincode::deserialize(&bytes[..BLOCK_HEADER_SIZE as usize])
            .map_err(|e| {
                BlobError::Corruption(format!("unreadable block header at offset {}: {}", offset, e))
            })?;

        if header.magic != BLOCK_MAGIC {
            return Err(BlobError::Corruption(format!(
                "no block magic at offset {}: found 0x{:08x}",
                offset, header.magic
            )));
        }
        let expected = header.compute_crc();
        if header.crc != expected {
            return Err(BlobError::Corruption(format!(
                "block header checksum mismatch at offset {}: expected 0x{:08x}, got 0x{:08x}",
                offset, expected, header.crc
            )));
        }
        if BlockState::from_u32(header.state).is_none() {
            return Err(BlobError::Corruption(format!(
                "unknown block state {} at offset {}",
                header.state, offset
            )));
        }
        if header.len > header.cap {
            return Err(BlobError::Corruption(format!(
                "block at offset {} holds {} bytes in a {} byte block",
                offset, header.len, header.cap
            )));
        }

        Ok(header)
    }
}
