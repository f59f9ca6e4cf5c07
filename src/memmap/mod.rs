//! Memory-Mapped Backend
//!
//! All blobs live in one growable file kept mapped into memory.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ File Header (reserved 4096 bytes, 28 used)                   │
//! │   Magic "BLOBMMAP" (8) | Version u32 | Flags u32             │
//! │   ArenaEnd u64 | CRC32 u32                                   │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Arena: blocks tiled back to back up to ArenaEnd              │
//! │ ┌──────────────────────────────────────────┬───────────────┐ │
//! │ │ Block Header (40)                        │ Payload (cap) │ │
//! │ │  Magic "BLK1" | State | Key | Len | Cap  │ Len bytes     │ │
//! │ │  CRC32 | PayloadCRC32                    │ + slack       │ │
//! │ └──────────────────────────────────────────┴───────────────┘ │
//! │   ... repeated; State = live (1) or free (2) ...             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Wilderness (unused until the arena grows into it)            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The block headers *are* the persisted index and free list: `connect`
//! walks them from the arena start to `ArenaEnd` to rebuild both.
//!
//! ## Concurrency
//! One `RwLock` guards the mapping, the index and the allocator together.
//! - `create`, `put_at`, `remove` and growth take it exclusively
//! - `contains`, `meta`, `get_all`, `get_offset`, `verify` take it shared
//!
//! Readers copy out of the mapping while holding the shared lock, so a remap
//! can never pull the arena out from under a copy in progress.

mod allocator;
mod arena;
mod format;
mod store;

pub use store::{ArenaStats, MemMapStore, VerifyReport};

/// File name of the backing file inside the store root
pub const BACKING_FILE: &str = "blobs.mmap";
