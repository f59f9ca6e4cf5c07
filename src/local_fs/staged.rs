//! Staged blob file
//!
//! A temp file in the store root that becomes a blob only when published.

use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::blob::Key;
use crate::error::{BlobError, Result};

use super::TEMP_PREFIX;

/// Blob contents written to a temp file, not yet visible under any key
///
/// Dropping an unpublished `StagedBlob` deletes the temp file.
pub(super) struct StagedBlob {
    file: NamedTempFile,
}

impl StagedBlob {
    /// Create an empty staged file inside `dir`
    ///
    /// Must be the same directory as the publish target so the final rename
    /// never crosses a filesystem boundary.
    pub(super) fn new_in(dir: &Path) -> Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(dir)?;
        Ok(Self { file })
    }

    /// Append blob contents
    pub(super) fn write(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data)?;
        Ok(())
    }

    /// fsync the staged contents
    pub(super) fn sync(&self) -> Result<()> {
        self.file.as_file().sync_all()?;
        Ok(())
    }

    /// Atomically move the staged file to `target`
    ///
    /// Fails with `AlreadyExists` if `target` exists; the temp file is removed
    /// in that case as in every other failure.
    pub(super) fn publish(self, target: &Path, key: Key) -> Result<()> {
        match self.file.persist_noclobber(target) {
            Ok(_) => Ok(()),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                Err(BlobError::AlreadyExists(key))
            }
            Err(e) => Err(BlobError::Io(e.error)),
        }
    }

    #[cfg(test)]
    fn path(&self) -> &Path {
        self.file.path()
    }
}
