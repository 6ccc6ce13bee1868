//! Error types for packstore
//!
//! Provides a unified error type for all operations. Corruption variants
//! always say where the damage was found (header, entry index or bundle
//! offset) so callers can decide to rebuild, skip or abort.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for packstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // Resource Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Destination already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Too many bundle segments (max {max})")]
    TooManySegments { max: u32 },

    // -------------------------------------------------------------------------
    // Corruption Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt index header in {}: {reason}", path.display())]
    CorruptHeader { path: PathBuf, reason: String },

    #[error("Corrupt entry at index {index} in {}", path.display())]
    CorruptEntry { path: PathBuf, index: u64 },

    #[error("Corrupt record at bundle offset {offset}")]
    CorruptRecord { offset: u64 },

    #[error("Truncated index {}: expected at least {expected} bytes, found {found}", path.display())]
    TruncatedIndex {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    #[error("Corrupt bundle header in {}: {reason}", path.display())]
    CorruptBundleHeader { path: PathBuf, reason: String },

    // -------------------------------------------------------------------------
    // Usage Errors
    // -------------------------------------------------------------------------
    #[error("Already closed")]
    AlreadyClosed,

    #[error("Allocation size mismatch: reserved {expected} bytes, got {actual}")]
    AllocationSize { expected: u32, actual: usize },

    #[error("No pending allocation at bundle offset {offset}")]
    UnknownAllocation { offset: u64 },

    #[error("Duplicate references allocation at offset {offset} that was never written")]
    UnfilledAllocation { offset: u64 },

    #[error("Read past end of index ({count} entries)")]
    ReadPastEnd { count: u64 },

    #[error("Record of {size} bytes exceeds segment limit of {limit} bytes")]
    RecordTooLarge { size: u64, limit: u64 },

    #[error("Key width mismatch: expected {expected} bytes, index has {found}")]
    KeyWidthMismatch { expected: usize, found: usize },

    #[error("Unknown reader token: {0}")]
    UnknownToken(u64),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// True for errors that mean on-disk data is damaged (rebuild, don't retry)
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StoreError::CorruptHeader { .. }
                | StoreError::CorruptEntry { .. }
                | StoreError::CorruptRecord { .. }
                | StoreError::TruncatedIndex { .. }
                | StoreError::CorruptBundleHeader { .. }
        )
    }
}
