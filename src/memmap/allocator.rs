//! Arena space allocator
//!
//! Tracks free blocks and the arena end, and hands out block positions.
//!
//! ## Free Space
//! ```text
//! ARENA_START                                   arena_end         file end
//! │ [live A][free 64][live B][live C][free 512] │ . . wilderness . . │
//! ```
//! Free blocks are indexed twice:
//! - `by_offset`: offset → cap, to find neighbors when coalescing
//! - `by_size`:   (cap, offset), for best-fit lookups
//!
//! A free block that ends at `arena_end` is folded back into the wilderness.
//!
//! ## Two-Phase Allocation
//! `reserve` takes space out of the free structures and returns a
//! `Reservation`. The caller writes the block, then either `commit`s (which
//! records any split remainder as free) or `rollback`s (which restores the
//! exact prior state). Nothing is leaked when a write fails in between.

use std::collections::{BTreeMap, BTreeSet};

use super::format::{align_cap, BLOCK_HEADER_SIZE};

/// Where reserved space came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    /// Carved out of a free block that had `original_cap` bytes of capacity
    Free { original_cap: u64 },
    /// Bumped from the arena end, which was `previous_end`
    Tail { previous_end: u64 },
}

/// A block position handed out by `reserve`, not yet committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Reservation {
    /// Offset of the block header
    pub offset: u64,
    /// Payload capacity of the block
    pub cap: u64,
    /// Trailing free block split off the source, as (offset, cap)
    pub remainder: Option<(u64, u64)>,
    pub source: Source,
}

impl Reservation {
    /// Offset of the first payload byte
    pub(crate) fn payload_offset(&self) -> u64 {
        self.offset + BLOCK_HEADER_SIZE
    }

    /// One past the last byte the reservation touches (remainder included)
    pub(crate) fn end(&self) -> u64 {
        match self.remainder {
            Some((offset, cap)) => offset + BLOCK_HEADER_SIZE + cap,
            None => self.offset + BLOCK_HEADER_SIZE + self.cap,
        }
    }

    /// New arena end if this reservation extended the arena
    pub(crate) fn new_arena_end(&self) -> Option<u64> {
        match self.source {
            Source::Tail { .. } => Some(self.end()),
            Source::Free { .. } => None,
        }
    }
}

/// What a released block turned into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Released {
    /// A free block at `offset` with `cap` bytes (after coalescing)
    Free { offset: u64, cap: u64 },
    /// Returned to the wilderness; the arena now ends at `arena_end`
    Tail { arena_end: u64 },
}

/// Free-space allocator over the arena
#[derive(Debug)]
pub(crate) struct Allocator {
    by_offset: BTreeMap<u64, u64>,
    by_size: BTreeSet<(u64, u64)>,
    arena_end: u64,
}

impl Allocator {
    /// Allocator for an empty arena ending at `arena_end`
    pub(crate) fn new(arena_end: u64) -> Self {
        Self {
            by_offset: BTreeMap::new(),
            by_size: BTreeSet::new(),
            arena_end,
        }
    }

    /// Rebuild from free blocks discovered while scanning the arena
    pub(crate) fn from_free_blocks(
        free_blocks: impl IntoIterator<Item = (u64, u64)>,
        arena_end: u64,
    ) -> Self {
        let mut allocator = Self::new(arena_end);
        for (offset, cap) in free_blocks {
            allocator.insert_free(offset, cap);
        }
        allocator
    }

    /// Current arena end
    pub(crate) fn arena_end(&self) -> u64 {
        self.arena_end
    }

    /// Number of free blocks
    pub(crate) fn free_blocks(&self) -> usize {
        self.by_offset.len()
    }

    /// Total payload capacity held by free blocks
    pub(crate) fn free_bytes(&self) -> u64 {
        self.by_offset.values().sum()
    }

    /// Reserve a block able to hold `len` payload bytes
    ///
    /// Best fit over free blocks first; bumps the arena end otherwise. The
    /// caller must make sure the mapping covers `Reservation::end()`.
    pub(crate) fn reserve(&mut self, len: u64) -> Reservation {
        let need = align_cap(len);

        let best_fit = self.by_size.range((need, 0)..).next().copied();
        if let Some((free_cap, offset)) = best_fit {
            self.remove_free(offset, free_cap);

            // Split only when the leftover can hold a header of its own
            let leftover = free_cap - need;
            let (cap, remainder) = if leftover >= BLOCK_HEADER_SIZE {
                let remainder_offset = offset + BLOCK_HEADER_SIZE + need;
                (need, Some((remainder_offset, leftover - BLOCK_HEADER_SIZE)))
            } else {
                (free_cap, None)
            };

            return Reservation {
                offset,
                cap,
                remainder,
                source: Source::Free {
                    original_cap: free_cap,
                },
            };
        }

        let offset = self.arena_end;
        self.arena_end = offset + BLOCK_HEADER_SIZE + need;
        Reservation {
            offset,
            cap: need,
            remainder: None,
            source: Source::Tail {
                previous_end: offset,
            },
        }
    }

    /// Finish a reservation whose block was written successfully
    pub(crate) fn commit(&mut self, reservation: &Reservation) {
        if let Some((offset, cap)) = reservation.remainder {
            self.insert_free(offset, cap);
        }
    }

    /// Undo a reservation whose block could not be written
    pub(crate) fn rollback(&mut self, reservation: &Reservation) {
        match reservation.source {
            Source::Free { original_cap } => self.insert_free(reservation.offset, original_cap),
            Source::Tail { previous_end } => self.arena_end = previous_end,
        }
    }

    /// Return a block to free space, coalescing with free neighbors
    pub(crate) fn release(&mut self, offset: u64, cap: u64) -> Released {
        let mut start = offset;
        let mut cap = cap;

        // Merge with the free block ending right where this one starts
        let previous = self
            .by_offset
            .range(..offset)
            .next_back()
            .map(|(&o, &c)| (o, c));
        if let Some((prev_offset, prev_cap)) = previous {
            if prev_offset + BLOCK_HEADER_SIZE + prev_cap == offset {
                self.remove_free(prev_offset, prev_cap);
                start = prev_offset;
                cap += prev_cap + BLOCK_HEADER_SIZE;
            }
        }

        // Merge with the free block starting right where this one ends
        let end = start + BLOCK_HEADER_SIZE + cap;
        if let Some(&next_cap) = self.by_offset.get(&end) {
            self.remove_free(end, next_cap);
            cap += next_cap + BLOCK_HEADER_SIZE;
        }

        if start + BLOCK_HEADER_SIZE + cap == self.arena_end {
            self.arena_end = start;
            return Released::Tail { arena_end: start };
        }

        self.insert_free(start, cap);
        Released::Free { offset: start, cap }
    }

    fn insert_free(&mut self, offset: u64, cap: u64) {
        self.by_offset.insert(offset, cap);
        self.by_size.insert((cap, offset));
    }

    fn remove_free(&mut self, offset: u64, cap: u64) {
        self.by_offset.remove(&offset);
        self.by_size.remove(&(cap, offset));
    }
}
