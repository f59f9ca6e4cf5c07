//! # blobstore
//!
//! A key-value blob storage engine with two interchangeable backends:
//! - Local filesystem: one file per blob, published atomically
//! - Memory-mapped: one growable file with an in-place free-space allocator
//!
//! Blobs are opaque byte sequences addressed by a 64-bit [`Key`]. Their length
//! is fixed at creation; ranges can be read and overwritten in place.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Client / blobstore-bench                      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │            Store::connect(&Config)  ──►  BlobStore           │
//! │      create · contains · meta · get_* · put_at · remove      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌───────────────┐        ┌──────────────────────────┐
//!   │  LocalFs      │        │  MemMap                  │
//!   │  root/{key}   │        │  root/blobs.mmap         │
//!   │  stage+rename │        │  arena · allocator · idx │
//!   └───────────────┘        └──────────────────────────┘
//! ```
//!
//! ## Example
//! ```no_run
//! use blobstore::{BlobStore, Config, BackendKind, Key, Store};
//!
//! let config = Config::builder()
//!     .root_dir("/tmp/blobs")
//!     .backend(BackendKind::MemMap)
//!     .build();
//! let store = Store::connect(&config)?;
//!
//! store.create(Key(7), b"hello")?;
//! assert_eq!(store.get_owned(Key(7))?, b"hello");
//! # Ok::<(), blobstore::BlobError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod blob;
pub mod config;
pub mod error;

pub mod local_fs;
pub mod memmap;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use blob::{BlobMeta, BlobRange, Key};
pub use config::{BackendKind, Config, ConfigBuilder, SyncStrategy};
pub use error::{BlobError, Result};
pub use local_fs::LocalFsStore;
pub use memmap::{ArenaStats, MemMapStore, VerifyReport};
pub use store::{BlobStore, Store};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of blobstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
