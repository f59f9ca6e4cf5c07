//! Store Contract
//!
//! The capability set every backend satisfies, plus the `Store` handle that
//! picks a backend from configuration.
//!
//! ## Contract
//! ```text
//! create(key, data)            key absent      → blob visible, else AlreadyExists
//! contains(key)                                → bool (never fails)
//! blob_size(key) / meta(key)                   → length, else NotFound
//! get_all(key, buf)            buf.len() == L  → buf filled, else SizeMismatch
//! get_offset(key, buf, off)    off + M <= L    → bytes [off, off+M), else OutOfRange
//! put_at(key, data, off)       off + M <= L    → bytes replaced in place
//! remove(key)                                  → key absent, space reusable
//! ```
//!
//! Both backends give bit-for-bit identical observable results for the same
//! sequence of calls, so a client can swap one for the other.

use crate::blob::{BlobMeta, Key};
use crate::config::{BackendKind, Config};
use crate::error::Result;
use crate::local_fs::LocalFsStore;
use crate::memmap::MemMapStore;

/// Operations shared by every backend
///
/// Implementations are safe to share across threads. See each backend for
/// the ordering it gives to concurrent calls on the same key.
pub trait BlobStore: Send + Sync {
    /// Store a new blob; fails with `AlreadyExists` if the key is present
    fn create(&self, key: Key, data: &[u8]) -> Result<()>;

    /// Check whether a key currently resolves to a blob
    fn contains(&self, key: Key) -> bool;

    /// Get metadata for a blob
    fn meta(&self, key: Key) -> Result<BlobMeta>;

    /// Get the length of a blob
    fn blob_size(&self, key: Key) -> Result<u64> {
        self.meta(key).map(|meta| meta.size)
    }

    /// Read a whole blob into `buf`, which must be exactly the blob length
    fn get_all(&self, key: Key, buf: &mut [u8]) -> Result<()>;

    /// Read `buf.len()` bytes starting at `offset`
    fn get_offset(&self, key: Key, buf: &mut [u8], offset: u64) -> Result<()>;

    /// Read a whole blob into a freshly allocated buffer
    fn get_owned(&self, key: Key) -> Result<Vec<u8>> {
        let size = self.blob_size(key)?;
        let mut buf = vec![0u8; size as usize];
        self.get_all(key, &mut buf)?;
        Ok(buf)
    }

    /// Overwrite `data.len()` bytes starting at `offset`; never changes the length
    fn put_at(&self, key: Key, data: &[u8], offset: u64) -> Result<()>;

    /// Delete a blob
    fn remove(&self, key: Key) -> Result<()>;

    /// Flush backend state to stable storage
    fn sync(&self) -> Result<()>;
}

/// A connected store, backed by whichever backend the config selected
pub enum Store {
    LocalFs(LocalFsStore),
    MemMap(MemMapStore),
}

impl Store {
    /// Open or initialize the backend named by `config.backend` at `config.root_dir`
    pub fn connect(config: &Config) -> Result<Self> {
        config.validate()?;

        let store = match config.backend {
            BackendKind::LocalFs => Store::LocalFs(LocalFsStore::connect_with(config)?),
            BackendKind::MemMap => Store::MemMap(MemMapStore::connect_with(config)?),
        };

        tracing::debug!(
            "Connected {:?} store at {}",
            config.backend,
            config.root_dir.display()
        );
        Ok(store)
    }

    /// Which backend this handle uses
    pub fn backend(&self) -> BackendKind {
        match self {
            Store::LocalFs(_) => BackendKind::LocalFs,
            Store::MemMap(_) => BackendKind::MemMap,
        }
    }

    fn inner(&self) -> &dyn BlobStore {
        match self {
            Store::LocalFs(store) => store,
            Store::MemMap(store) => store,
        }
    }
}

impl BlobStore for Store {
    fn create(&self, key: Key, data: &[u8]) -> Result<()> {
        self.inner().create(key, data)
    }

    fn contains(&self, key: Key) -> bool {
        self.inner().contains(key)
    }

    fn meta(&self, key: Key) -> Result<BlobMeta> {
        self.inner().meta(key)
    }

    fn get_all(&self, key: Key, buf: &mut [u8]) -> Result<()> {
        self.inner().get_all(key, buf)
    }

    fn get_offset(&self, key: Key, buf: &mut [u8], offset: u64) -> Result<()> {
        self.inner().get_offset(key, buf, offset)
    }

    fn get_owned(&self, key: Key) -> Result<Vec<u8>> {
        self.inner().get_owned(key)
    }

    fn put_at(&self, key: Key, data: &[u8], offset: u64) -> Result<()> {
        self.inner().put_at(key, data, offset)
    }

    fn remove(&self, key: Key) -> Result<()> {
        self.inner().remove(key)
    }

    fn sync(&self) -> Result<()> {
        self.inner().sync()
    }
}
