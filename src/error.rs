//! Error types for blobstore
//!
//! Provides a unified error type for every backend.

use thiserror::Error;

use crate::blob::Key;

/// Result type alias using BlobError
pub type Result<T> = std::result::Result<T, BlobError>;

/// Unified error type for blobstore operations
#[derive(Debug, Error)]
pub enum BlobError {
    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Blob not found: {0}")]
    NotFound(Key),

    #[error("Blob already exists: {0}")]
    AlreadyExists(Key),

    // -------------------------------------------------------------------------
    // Range Errors
    // -------------------------------------------------------------------------
    #[error("Buffer size mismatch for {key}: blob is {expected} bytes, buffer is {actual} bytes")]
    SizeMismatch {
        key: Key,
        expected: u64,
        actual: u64,
    },

    #[error("Range out of bounds for {key}: offset {offset} + len {len} exceeds blob size {size}")]
    OutOfRange {
        key: Key,
        offset: u64,
        len: u64,
        size: u64,
    },

    // -------------------------------------------------------------------------
    // Capacity Errors
    // -------------------------------------------------------------------------
    #[error("Arena full: {requested} bytes needed, limit is {limit} bytes")]
    ArenaFull { requested: u64, limit: u64 },

    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Persisted State Errors
    // -------------------------------------------------------------------------
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BlobError {
    /// Returns true for `NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound(_))
    }
}
