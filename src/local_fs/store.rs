//! Local-filesystem store implementation

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::blob::{checked_range, BlobMeta, Key};
use crate::config::{BackendKind, Config, SyncStrategy};
use crate::error::{BlobError, Result};
use crate::store::BlobStore;

use super::staged::StagedBlob;
use super::TEMP_PREFIX;

/// Blob store keeping one file per key under a root directory
pub struct LocalFsStore {
    /// Directory holding every blob file
    root: PathBuf,

    /// Whether mutations are fsynced before returning
    sync_strategy: SyncStrategy,
}

impl LocalFsStore {
    /// Open or create a store at `root` with default settings
    pub fn connect(root: impl AsRef<Path>) -> Result<Self> {
        let config = Config::builder()
            .root_dir(root.as_ref())
            .backend(BackendKind::LocalFs)
            .build();
        Self::connect_with(&config)
    }

    /// Open or create a store described by `config`
    ///
    /// On startup:
    /// 1. Create the root directory if it doesn't exist
    /// 2. Sweep staged files left behind by an interrupted `create`
    /// 3. Ready to serve requests (the directory listing is the index)
    pub fn connect_with(config: &Config) -> Result<Self> {
        fs::create_dir_all(&config.root_dir)?;

        let store = Self {
            root: config.root_dir.clone(),
            sync_strategy: config.sync_strategy,
        };

        let swept = store.sweep_staged()?;
        if swept > 0 {
            tracing::warn!(
                "Removed {} staged files left in {}",
                swept,
                store.root.display()
            );
        }

        tracing::info!(
            "Opened local-fs store at {} ({} blobs)",
            store.root.display(),
            store.keys()?.len()
        );
        Ok(store)
    }

    /// Get the root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical file path for a key: `{root}/{16 hex digits}`
    pub fn blob_path(&self, key: Key) -> PathBuf {
        self.root.join(key.to_hex())
    }

    /// List every key currently stored (unordered)
    pub fn keys(&self) -> Result<Vec<Key>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(key) = entry.file_name().to_str().and_then(Key::from_hex) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Delete leftover `.tmp-*` files, returning how many were removed
    fn sweep_staged(&self) -> Result<usize> {
        let mut swept = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let is_staged = entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with(TEMP_PREFIX))
                .unwrap_or(false);

            if is_staged && entry.file_type()?.is_file() {
                match fs::remove_file(entry.path()) {
                    Ok(()) => swept += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(swept)
    }

    /// Open a blob file, returning it with its length
    ///
    /// The length is read from the open handle, so it stays consistent with
    /// the bytes that handle reads even if the path is removed meanwhile.
    fn open_blob(&self, key: Key, writable: bool) -> Result<(File, u64)> {
        let path = self.blob_path(key);
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&path)
            .map_err(|e| not_a_blob_or(e, &path, key))?;

        // A directory opens fine read-only; it is still not a blob
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(BlobError::NotFound(key));
        }
        Ok((file, metadata.len()))
    }

    /// fsync the root directory so renames and unlinks are durable
    fn sync_root(&self) -> Result<()> {
        #[cfg(unix)]
        {
            File::open(&self.root)?.sync_all()?;
        }
        Ok(())
    }
}

impl BlobStore for LocalFsStore {
    fn create(&self, key: Key, data: &[u8]) -> Result<()> {
        let target = self.blob_path(key);

        // Fast path: don't stage a large payload for a key we would reject anyway
        if target.exists() {
            return Err(BlobError::AlreadyExists(key));
        }

        let mut staged = StagedBlob::new_in(&self.root)?;
        staged.write(data)?;
        if self.sync_strategy == SyncStrategy::EveryWrite {
            staged.sync()?;
        }

        // The no-clobber publish decides races between concurrent creates
        staged.publish(&target, key)?;

        if self.sync_strategy == SyncStrategy::EveryWrite {
            self.sync_root()?;
        }

        tracing::debug!("Created {} ({} bytes)", key, data.len());
        Ok(())
    }

    fn contains(&self, key: Key) -> bool {
        self.blob_path(key).is_file()
    }

    fn meta(&self, key: Key) -> Result<BlobMeta> {
        let metadata = fs::metadata(self.blob_path(key)).map_err(|e| not_found_or_io(e, key))?;
        if !metadata.is_file() {
            return Err(BlobError::NotFound(key));
        }
        Ok(BlobMeta {
            size: metadata.len(),
        })
    }

    fn get_all(&self, key: Key, buf: &mut [u8]) -> Result<()> {
        let (mut file, size) = self.open_blob(key, false)?;

        if size != buf.len() as u64 {
            return Err(BlobError::SizeMismatch {
                key,
                expected: size,
                actual: buf.len() as u64,
            });
        }

        file.read_exact(buf)?;
        Ok(())
    }

    fn get_offset(&self, key: Key, buf: &mut [u8], offset: u64) -> Result<()> {
        let (mut file, size) = self.open_blob(key, false)?;
        checked_range(key, offset, buf.len() as u64, size)?;

        if buf.is_empty() {
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn get_owned(&self, key: Key) -> Result<Vec<u8>> {
        // One handle for size and bytes, so a concurrent remove + create
        // cannot hand us a length from one blob and bytes from another
        let (mut file, size) = self.open_blob(key, false)?;
        let mut data = Vec::with_capacity(size as usize);
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    fn put_at(&self, key: Key, data: &[u8], offset: u64) -> Result<()> {
        let (mut file, size) = self.open_blob(key, true)?;
        checked_range(key, offset, data.len() as u64, size)?;

        if data.is_empty() {
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        if self.sync_strategy == SyncStrategy::EveryWrite {
            file.sync_data()?;
        }

        tracing::debug!("Replaced {} bytes of {} at offset {}", data.len(), key, offset);
        Ok(())
    }

    fn remove(&self, key: Key) -> Result<()> {
        let path = self.blob_path(key);
        fs::remove_file(&path).map_err(|e| not_a_blob_or(e, &path, key))?;

        if self.sync_strategy == SyncStrategy::EveryWrite {
            self.sync_root()?;
        }

        tracing::debug!("Removed {}", key);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.sync_root()
    }
}

/// Map a missing file to `NotFound(key)`, anything else to `Io`
fn not_found_or_io(err: io::Error, key: Key) -> BlobError {
    if err.kind() == io::ErrorKind::NotFound {
        BlobError::NotFound(key)
    } else {
        BlobError::Io(err)
    }
}

/// Like `not_found_or_io`, but a directory squatting on the blob name is also `NotFound`
fn not_a_blob_or(err: io::Error, path: &Path, key: Key) -> BlobError {
    if path.is_dir() {
        BlobError::NotFound(key)
    } else {
        not_found_or_io(err, key)
    }
}
