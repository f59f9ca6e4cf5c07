//! Memory-mapped arena
//!
//! Owns the backing file and its current mapping. Every access goes through
//! an `(offset, len)` pair resolved against the mapping of the moment; no
//! address into the mapping is ever handed out past the borrow of `&self`.
//!
//! ## Growth
//! ```text
//! grow(min_len)
//!   ──► flush dirty pages of the current mapping
//!   ──► set_len(new_len)                       (file grows, old bytes kept)
//!   ──► map the whole file again, drop the old mapping
//!   ──► generation += 1                        (old base address is dead)
//! ```
//! `grow` needs `&mut self`, so it can only run while the store's lock is
//! held exclusively and no reader is mid-copy.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::MmapMut;

use crate::config::Config;
use crate::error::{BlobError, Result};

/// How the backing file grows
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct GrowthPolicy {
    /// Multiplier applied to the current length
    pub factor: f64,
    /// New lengths are rounded up to a multiple of this (power of two)
    pub granularity: u64,
    /// The file never grows past this length
    pub max_len: u64,
}

impl GrowthPolicy {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            factor: config.growth_factor,
            granularity: config.growth_granularity,
            max_len: config.max_arena_size,
        }
    }

    /// Length to grow a file of `current` bytes to so it covers `min_len`
    ///
    /// Fails with `ArenaFull` when `min_len` is past `max_len`. The scaled
    /// target is clamped to `max_len` rather than rejected.
    fn next_len(&self, current: u64, min_len: u64) -> Result<u64> {
        let full = || BlobError::ArenaFull {
            requested: min_len,
            limit: self.max_len,
        };

        let needed = round_up(min_len, self.granularity).ok_or_else(full)?;
        if min_len > self.max_len {
            return Err(full());
        }

        // Saturates on overflow; clamped right after
        let scaled = (current as f64 * self.factor) as u64;
        let wanted = round_up(scaled, self.granularity).unwrap_or(u64::MAX);

        Ok(needed.max(wanted).min(self.max_len).max(min_len))
    }
}

/// A growable file mapped read-write into memory
pub(crate) struct Arena {
    file: File,
    mmap: MmapMut,
    /// Incremented every time the mapping is replaced
    generation: u64,
    growth: GrowthPolicy,
}

impl Arena {
    /// Create (or truncate) a backing file of `initial_len` bytes and map it
    pub(crate) fn create(path: &Path, initial_len: u64, growth: GrowthPolicy) -> Result<Self> {
        let initial_len = growth.next_len(0, initial_len.max(1))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(initial_len)?;

        Self::map(file, growth)
    }

    /// Map an existing backing file
    pub(crate) fn open(path: &Path, growth: GrowthPolicy) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(BlobError::Corruption(format!(
                "backing file {} is empty",
                path.display()
            )));
        }

        Self::map(file, growth)
    }

    fn map(file: File, growth: GrowthPolicy) -> Result<Self> {
        // SAFETY: the store owns the backing file for its whole lifetime and
        // nothing else in the process maps it. Another process modifying the
        // file concurrently is outside the supported usage.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            file,
            mmap,
            generation: 0,
            growth,
        })
    }

    /// Mapped length (equal to the file length)
    pub(crate) fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Mapping generation, bumped on every remap
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Borrow `len` bytes at `offset`
    pub(crate) fn slice(&self, offset: u64, len: u64) -> Result<&[u8]> {
        let range = self.checked(offset, len)?;
        Ok(&self.mmap[range])
    }

    /// Copy bytes at `offset` into `buf`
    pub(crate) fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let range = self.checked(offset, buf.len() as u64)?;
        buf.copy_from_slice(&self.mmap[range]);
        Ok(())
    }

    /// Copy `data` into the mapping at `offset`
    pub(crate) fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let range = self.checked(offset, data.len() as u64)?;
        self.mmap[range].copy_from_slice(data);
        Ok(())
    }

    /// Grow the file so the mapping covers at least `min_len` bytes
    ///
    /// Returns true if the mapping was replaced. Fails with `ArenaFull`,
    /// leaving the mapping untouched, when the growth limit is in the way.
    pub(crate) fn ensure_len(&mut self, min_len: u64) -> Result<bool> {
        if min_len <= self.len() {
            return Ok(false);
        }
        self.grow(min_len)?;
        Ok(true)
    }

    fn grow(&mut self, min_len: u64) -> Result<()> {
        let current = self.len();
        let new_len = self.growth.next_len(current, min_len)?;

        // Dirty pages must reach the file before the old mapping goes away
        self.mmap.flush()?;
        self.file.set_len(new_len)?;

        // SAFETY: same ownership argument as in `map`. The old mapping is
        // dropped on assignment; `&mut self` guarantees no borrow of it is live.
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        self.generation += 1;

        tracing::info!(
            "Arena grown from {} to {} bytes (generation {})",
            current,
            new_len,
            self.generation
        );
        Ok(())
    }

    /// Synchronously flush the whole mapping to the file
    pub(crate) fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    /// Bounds-check `[offset, offset + len)` against the mapping
    fn checked(&self, offset: u64, len: u64) -> Result<std::ops::Range<usize>> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len() => Ok(offset as usize..end as usize),
            _ => Err(BlobError::Corruption(format!(
                "arena access [{}, +{}) outside mapping of {} bytes",
                offset,
                len,
                self.len()
            ))),
        }
    }
}

/// Round `value` up to a multiple of the power of two `granularity`
fn round_up(value: u64, granularity: u64) -> Option<u64> {
    let mask = granularity - 1;
    value.checked_add(mask).map(|v| v & !mask)
}
