//! Local-Filesystem Backend
//!
//! One regular file per blob; the directory itself is the index.
//!
//! ## Layout
//! ```text
//! {root}/
//!   ├── 000000000000002a      (blob for key 42, file length = blob size)
//!   ├── 0000000000000007
//!   └── .tmp-Xa81Qz           (in-flight create, never a valid key name)
//! ```
//!
//! ## Write Path
//! ```text
//! create(key, data)
//!   ──► stage data in {root}/.tmp-*        (deleted on drop, every exit path)
//!   ──► fsync staged file                  (SyncStrategy::EveryWrite only)
//!   ──► no-clobber rename to {root}/{hex}  (atomic publish, fails if present)
//! ```
//!
//! ## Concurrency
//! No in-process lock. Each key owns an independent file, so calls on
//! distinct keys never interact. Calls on the *same* key are unordered:
//! - two racing `create`s: exactly one wins, the other gets `AlreadyExists`
//! - a read racing `remove`: sees either the whole blob or `NotFound`
//! - a read racing `put_at`: may observe the bytes before or after the write
//!
//! Only one process should own a root directory at a time: `connect` sweeps
//! leftover `.tmp-*` files.

mod staged;
mod store;

pub use store::LocalFsStore;

/// Name prefix of staged (not yet published) blob files
pub(crate) const TEMP_PREFIX: &str = ".tmp-";
