//! Memory-mapped store implementation

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::blob::{checked_range, BlobMeta, Key};
use crate::config::{BackendKind, Config, SyncStrategy};
use crate::error::{BlobError, Result};
use crate::store::BlobStore;

use super::allocator::{Allocator, Released, Reservation, Source};
use super::arena::{Arena, GrowthPolicy};
use super::format::{
    BlockHeader, BlockState, FileHeader, ARENA_START, BLOCK_HEADER_SIZE, FILE_HEADER_SIZE,
};
use super::BACKING_FILE;

/// Where a live blob sits in the arena
#[derive(Debug, Clone, Copy)]
struct Location {
    /// Offset of the block header
    offset: u64,
    /// Blob length
    len: u64,
    /// Block payload capacity (>= len)
    cap: u64,
}

impl Location {
    fn payload_offset(&self) -> u64 {
        self.offset + BLOCK_HEADER_SIZE
    }
}

/// Everything the store lock protects
struct State {
    arena: Arena,
    index: HashMap<Key, Location>,
    allocator: Allocator,
}

/// Space usage snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Backing file length
    pub file_len: u64,
    /// End of the last block
    pub arena_end: u64,
    pub live_blobs: usize,
    /// Sum of live blob lengths
    pub live_bytes: u64,
    pub free_blocks: usize,
    /// Payload capacity sitting in free blocks
    pub free_bytes: u64,
    /// Mapping generation (number of remaps since connect)
    pub generation: u64,
}

/// Result of a full payload checksum sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyReport {
    pub blobs_checked: usize,
    pub bytes_checked: u64,
}

/// Blob store backed by a single memory-mapped file
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Mutations** (create/put_at/remove, and any arena growth they trigger)
///   hold `state` exclusively, so they are serialized with each other.
/// - **Reads** hold `state` shared and copy bytes out before releasing it;
///   no reference into the mapping escapes a call.
pub struct MemMapStore {
    /// Path to the backing file
    path: PathBuf,

    /// Whether mutations are flushed before returning
    sync_strategy: SyncStrategy,

    /// Mapping, index and allocator behind one lock
    state: RwLock<State>,
}

impl MemMapStore {
    /// Open or create a store at `root` with default settings
    pub fn connect(root: impl AsRef<Path>) -> Result<Self> {
        let config = Config::builder()
            .root_dir(root.as_ref())
            .backend(BackendKind::MemMap)
            .build();
        Self::connect_with(&config)
    }

    /// Open or create a store described by `config`
    ///
    /// On startup:
    /// 1. Create the root directory if it doesn't exist
    /// 2. Create a fresh backing file, or map the existing one
    /// 3. Validate the file header
    /// 4. Walk every block to rebuild the index and the free list
    ///
    /// Any inconsistency in step 3 or 4 fails with `Corruption`; the file is
    /// left untouched.
    pub fn connect_with(config: &Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.root_dir)?;

        let path = config.root_dir.join(BACKING_FILE);
        let existing = match fs::metadata(&path) {
            Ok(metadata) => metadata.len() > 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        let growth = GrowthPolicy::from_config(config);
        let state = if existing {
            let arena = Arena::open(&path, growth)?;
            Self::recover(arena).map_err(|e| {
                tracing::warn!("Refusing to open {}: {}", path.display(), e);
                e
            })?
        } else {
            let mut arena =
                Arena::create(&path, config.initial_arena_size.max(ARENA_START), growth)?;
            arena.write(0, &FileHeader::new(ARENA_START).encode()?)?;
            arena.flush()?;
            State {
                arena,
                index: HashMap::new(),
                allocator: Allocator::new(ARENA_START),
            }
        };

        tracing::info!(
            "Opened memmap store at {} ({} blobs, {} byte file)",
            path.display(),
            state.index.len(),
            state.arena.len()
        );

        Ok(Self {
            path,
            sync_strategy: config.sync_strategy,
            state: RwLock::new(state),
        })
    }

    /// Get the backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// List every key currently stored (unordered)
    pub fn keys(&self) -> Vec<Key> {
        self.state.read().index.keys().copied().collect()
    }

    /// Space usage snapshot
    pub fn stats(&self) -> ArenaStats {
        let state = self.state.read();
        ArenaStats {
            file_len: state.arena.len(),
            arena_end: state.allocator.arena_end(),
            live_blobs: state.index.len(),
            live_bytes: state.index.values().map(|loc| loc.len).sum(),
            free_blocks: state.allocator.free_blocks(),
            free_bytes: state.allocator.free_bytes(),
            generation: state.arena.generation(),
        }
    }

    /// Recompute every live payload checksum
    ///
    /// Fails with `Corruption` on the first blob whose bytes or header no
    /// longer match what was written.
    pub fn verify(&self) -> Result<VerifyReport> {
        let state = self.state.read();
        let mut report = VerifyReport {
            blobs_checked: 0,
            bytes_checked: 0,
        };

        for (key, loc) in state.index.iter() {
            let header = Self::read_block_header(&state.arena, loc.offset)?;
            if header.key != key.0 || header.len != loc.len || header.cap != loc.cap {
                return Err(BlobError::Corruption(format!(
                    "block header at offset {} no longer describes {}",
                    loc.offset, key
                )));
            }

            let payload = state.arena.slice(loc.payload_offset(), loc.len)?;
            let actual = crc32fast::hash(payload);
            if actual != header.payload_crc {
                return Err(BlobError::Corruption(format!(
                    "payload checksum mismatch for {}: expected 0x{:08x}, got 0x{:08x}",
                    key, header.payload_crc, actual
                )));
            }

            report.blobs_checked += 1;
            report.bytes_checked += loc.len;
        }

        Ok(report)
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Rebuild index and allocator from an existing backing file
    fn recover(arena: Arena) -> Result<State> {
        let header = FileHeader::decode(arena.slice(0, FILE_HEADER_SIZE as u64)?)?;

        let arena_end = header.arena_end;
        if arena_end < ARENA_START || arena_end > arena.len() {
            return Err(BlobError::Corruption(format!(
                "arena end {} outside [{}, {}]",
                arena_end,
                ARENA_START,
                arena.len()
            )));
        }

        let mut index = HashMap::new();
        let mut free_blocks = Vec::new();
        let mut offset = ARENA_START;

        while offset < arena_end {
            if arena_end - offset < BLOCK_HEADER_SIZE {
                return Err(BlobError::Corruption(format!(
                    "partial block header at offset {} (arena ends at {})",
                    offset, arena_end
                )));
            }

            let block = Self::read_block_header(&arena, offset)?;
            let block_end = offset
                .checked_add(BLOCK_HEADER_SIZE + block.cap)
                .filter(|&end| end <= arena_end)
                .ok_or_else(|| {
                    BlobError::Corruption(format!(
                        "block at offset {} with capacity {} runs past arena end {}",
                        offset, block.cap, arena_end
                    ))
                })?;

            match block.block_state() {
                BlockState::Live => {
                    let key = Key(block.key);
                    let loc = Location {
                        offset,
                        len: block.len,
                        cap: block.cap,
                    };
                    if index.insert(key, loc).is_some() {
                        return Err(BlobError::Corruption(format!(
                            "{} stored twice (second copy at offset {})",
                            key, offset
                        )));
                    }
                }
                BlockState::Free => free_blocks.push((offset, block.cap)),
            }

            offset = block_end;
        }

        tracing::debug!(
            "Recovered {} blobs and {} free blocks from arena of {} bytes",
            index.len(),
            free_blocks.len(),
            arena_end - ARENA_START
        );

        Ok(State {
            arena,
            index,
            allocator: Allocator::from_free_blocks(free_blocks, arena_end),
        })
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn read_block_header(arena: &Arena, offset: u64) -> Result<BlockHeader> {
        BlockHeader::decode(arena.slice(offset, BLOCK_HEADER_SIZE)?, offset)
    }

    fn write_block_header(arena: &mut Arena, offset: u64, header: &BlockHeader) -> Result<()> {
        arena.write(offset, &header.encode()?)
    }

    fn write_arena_end(arena: &mut Arena, arena_end: u64) -> Result<()> {
        arena.write(0, &FileHeader::new(arena_end).encode()?)
    }

    fn flush_if_required(&self, arena: &Arena) -> Result<()> {
        if self.sync_strategy == SyncStrategy::EveryWrite {
            arena.flush()?;
        }
        Ok(())
    }

    /// Write a new block for `key` into reserved space
    ///
    /// Publication order: payload, split remainder, live header, arena end.
    /// The live header is the commit point on disk.
    fn write_block(
        &self,
        arena: &mut Arena,
        key: Key,
        data: &[u8],
        reservation: &Reservation,
    ) -> Result<()> {
        arena.ensure_len(reservation.end())?;

        arena.write(reservation.payload_offset(), data)?;

        if let Some((offset, cap)) = reservation.remainder {
            Self::write_block_header(arena, offset, &BlockHeader::free(cap))?;
        }

        let header = BlockHeader::live(
            key.0,
            data.len() as u64,
            reservation.cap,
            crc32fast::hash(data),
        );
        Self::write_block_header(arena, reservation.offset, &header)?;

        if let Some(arena_end) = reservation.new_arena_end() {
            Self::write_arena_end(arena, arena_end)?;
        }

        self.flush_if_required(arena)
    }

    /// Put the on-disk headers back the way they were before a failed create
    fn undo_block(arena: &mut Arena, reservation: &Reservation) {
        let restored = match reservation.source {
            Source::Free { original_cap } => Self::write_block_header(
                arena,
                reservation.offset,
                &BlockHeader::free(original_cap),
            ),
            Source::Tail { previous_end } => Self::write_arena_end(arena, previous_end),
        };
        if let Err(e) = restored {
            tracing::warn!("Failed to restore headers after aborted create: {}", e);
        }
    }
}

impl BlobStore for MemMapStore {
    fn create(&self, key: Key, data: &[u8]) -> Result<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        if state.index.contains_key(&key) {
            return Err(BlobError::AlreadyExists(key));
        }

        let reservation = state.allocator.reserve(data.len() as u64);
        if let Err(e) = self.write_block(&mut state.arena, key, data, &reservation) {
            Self::undo_block(&mut state.arena, &reservation);
            state.allocator.rollback(&reservation);
            return Err(e);
        }
        state.allocator.commit(&reservation);

        state.index.insert(
            key,
            Location {
                offset: reservation.offset,
                len: data.len() as u64,
                cap: reservation.cap,
            },
        );

        tracing::debug!(
            "Created {} ({} bytes) at offset {}",
            key,
            data.len(),
            reservation.offset
        );
        Ok(())
    }

    fn contains(&self, key: Key) -> bool {
        self.state.read().index.contains_key(&key)
    }

    fn meta(&self, key: Key) -> Result<BlobMeta> {
        let state = self.state.read();
        let loc = state.index.get(&key).ok_or(BlobError::NotFound(key))?;
        Ok(BlobMeta { size: loc.len })
    }

    fn get_all(&self, key: Key, buf: &mut [u8]) -> Result<()> {
        let state = self.state.read();
        let loc = state.index.get(&key).ok_or(BlobError::NotFound(key))?;

        if loc.len != buf.len() as u64 {
            return Err(BlobError::SizeMismatch {
                key,
                expected: loc.len,
                actual: buf.len() as u64,
            });
        }

        state.arena.read(loc.payload_offset(), buf)
    }

    fn get_offset(&self, key: Key, buf: &mut [u8], offset: u64) -> Result<()> {
        let state = self.state.read();
        let loc = state.index.get(&key).ok_or(BlobError::NotFound(key))?;
        let range = checked_range(key, offset, buf.len() as u64, loc.len)?;

        state.arena.read(loc.payload_offset() + range.start, buf)
    }

    fn get_owned(&self, key: Key) -> Result<Vec<u8>> {
        // Size lookup and copy under one lock, so a concurrent
        // remove-and-recreate can't cause a spurious SizeMismatch
        let state = self.state.read();
        let loc = state.index.get(&key).ok_or(BlobError::NotFound(key))?;

        let mut buf = vec![0u8; loc.len as usize];
        state.arena.read(loc.payload_offset(), &mut buf)?;
        Ok(buf)
    }

    fn put_at(&self, key: Key, data: &[u8], offset: u64) -> Result<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let loc = *state.index.get(&key).ok_or(BlobError::NotFound(key))?;
        let range = checked_range(key, offset, data.len() as u64, loc.len)?;

        state.arena.write(loc.payload_offset() + range.start, data)?;

        let payload_crc = crc32fast::hash(state.arena.slice(loc.payload_offset(), loc.len)?);
        let header = BlockHeader::live(key.0, loc.len, loc.cap, payload_crc);
        Self::write_block_header(&mut state.arena, loc.offset, &header)?;

        self.flush_if_required(&state.arena)?;

        tracing::debug!("Replaced {} bytes of {} at offset {}", data.len(), key, offset);
        Ok(())
    }

    fn remove(&self, key: Key) -> Result<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let loc = state.index.remove(&key).ok_or(BlobError::NotFound(key))?;

        // Payload bytes are left as they are; only headers change
        match state.allocator.release(loc.offset, loc.cap) {
            Released::Free { offset, cap } => {
                Self::write_block_header(&mut state.arena, offset, &BlockHeader::free(cap))?;
            }
            Released::Tail { arena_end } => {
                Self::write_arena_end(&mut state.arena, arena_end)?;
            }
        }

        self.flush_if_required(&state.arena)?;

        tracing::debug!("Removed {} from offset {}", key, loc.offset);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.state.read().arena.flush()
    }
}

impl Drop for MemMapStore {
    fn drop(&mut self) {
        // Best-effort flush; the OS writes back dirty pages regardless
        if let Err(e) = self.state.get_mut().arena.flush() {
            tracing::warn!("Failed to flush {} on close: {}", self.path.display(), e);
        }
    }
}
