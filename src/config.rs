//! Configuration for blobstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{BlobError, Result};

/// Main configuration for a blobstore instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory of the store
    /// Internal structure:
    ///   local-fs: {root_dir}/{16 hex digits}   (one file per blob)
    ///   memmap:   {root_dir}/blobs.mmap        (single backing file)
    pub root_dir: PathBuf,

    /// Which backend `Store::connect` opens
    pub backend: BackendKind,

    /// When mutations are flushed to stable storage
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Memory-Mapped Backend Configuration
    // -------------------------------------------------------------------------
    /// File size of a freshly created backing file (in bytes)
    pub initial_arena_size: u64,

    /// Multiplier applied to the file size when the arena must grow
    pub growth_factor: f64,

    /// Grown file sizes are rounded up to a multiple of this (in bytes)
    pub growth_granularity: u64,

    /// The backing file never grows past this (in bytes)
    pub max_arena_size: u64,
}

/// Largest accepted `growth_factor`
pub const MAX_GROWTH_FACTOR: f64 = 16.0;

/// Largest accepted `growth_granularity` (1 GB)
pub const MAX_GROWTH_GRANULARITY: u64 = 1 << 30;

/// Hard ceiling for `max_arena_size`; file lengths are signed 64-bit on most platforms
pub const ARENA_SIZE_CEILING: u64 = i64::MAX as u64;

/// Backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// One file per blob under the root directory
    LocalFs,

    /// One growable memory-mapped file
    MemMap,
}

/// Sync strategy: how often mutations reach stable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Leave flushing to the OS (and to explicit `sync()` calls)
    Never,

    /// fsync/msync before every mutation returns (safest, slowest)
    EveryWrite,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./blobstore_data"),
            backend: BackendKind::LocalFs,
            sync_strategy: SyncStrategy::Never,
            initial_arena_size: 1024 * 1024, // 1 MB
            growth_factor: 2.0,
            growth_granularity: 64 * 1024, // 64 KB
            max_arena_size: 1 << 40,        // 1 TB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(BlobError::Config("root_dir must not be empty".into()));
        }
        if !(1.0..=MAX_GROWTH_FACTOR).contains(&self.growth_factor) {
            return Err(BlobError::Config(format!(
                "growth_factor must be within [1.0, {}], got {}",
                MAX_GROWTH_FACTOR, self.growth_factor
            )));
        }
        if self.growth_granularity == 0
            || !self.growth_granularity.is_power_of_two()
            || self.growth_granularity > MAX_GROWTH_GRANULARITY
        {
            return Err(BlobError::Config(format!(
                "growth_granularity must be a power of two in [1, {}], got {}",
                MAX_GROWTH_GRANULARITY, self.growth_granularity
            )));
        }
        if self.max_arena_size > ARENA_SIZE_CEILING {
            return Err(BlobError::Config(format!(
                "max_arena_size must be <= {}, got {}",
                ARENA_SIZE_CEILING, self.max_arena_size
            )));
        }
        if self.initial_arena_size > self.max_arena_size {
            return Err(BlobError::Config(format!(
                "initial_arena_size {} exceeds max_arena_size {}",
                self.initial_arena_size, self.max_arena_size
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the root directory
    pub fn root_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.root_dir = path.into();
        self
    }

    /// Set the backend
    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the initial backing file size for the memmap backend (in bytes)
    pub fn initial_arena_size(mut self, size: u64) -> Self {
        self.config.initial_arena_size = size;
        self
    }

    /// Set the arena growth factor
    pub fn growth_factor(mut self, factor: f64) -> Self {
        self.config.growth_factor = factor;
        self
    }

    /// Set the arena growth granularity (in bytes)
    pub fn growth_granularity(mut self, bytes: u64) -> Self {
        self.config.growth_granularity = bytes;
        self
    }

    /// Set the largest size the memmap backing file may grow to (in bytes)
    pub fn max_arena_size(mut self, bytes: u64) -> Self {
        self.config.max_arena_size = bytes;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
