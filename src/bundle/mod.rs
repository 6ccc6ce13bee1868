//! Bundle Module
//!
//! Append-only record store split into size-bounded segment files.
//!
//! ## Layout
//! ```text
//! <dir>/bundle.hdr    header (bincode, CRC-framed)
//! <dir>/bundle.0000   segment 0: [payload][crc32] [payload][crc32] ...
//! <dir>/bundle.0001   segment 1
//! ```
//!
//! ## Addressing
//! A logical offset is `segment * segment_break + offset_in_segment`. A new
//! segment starts whenever the next record would push the active one past
//! `segment_break`, so records never span segments and segment `n+1` always
//! begins at logical offset `(n+1) * segment_break`.

mod cache;
mod reader;
mod writer;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::pool::FilePool;

pub use cache::{CacheStats, MIN_CACHE_BLOCKS};
pub use reader::BundleReader;
pub use writer::BundleWriter;

// =============================================================================
// Shared Constants
// =============================================================================

/// Header file name inside the bundle directory
pub const HEADER_FILE_NAME: &str = "bundle.hdr";

/// Prefix of segment file names
pub const SEGMENT_FILE_PREFIX: &str = "bundle";

/// Max segment files per bundle (four-digit suffix)
pub const SEGMENT_COUNT_MAX: u32 = 10000;

/// Signature stored in every bundle header
pub(crate) const HEADER_SIGNATURE: &str = "PackBundleHeader";

/// Current bundle header format version
pub(crate) const FORMAT_VERSION: u32 = 1;

/// Segment file name for segment number `n` ("bundle.0007")
pub fn segment_file_name(n: u32) -> String {
    format!("{}.{:04}", SEGMENT_FILE_PREFIX, n)
}

// =============================================================================
// Allocation Handle
// =============================================================================

/// A reserved byte range in a bundle
///
/// Returned by `allocate` before the record's content is known. `size`
/// excludes the CRC trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationHandle {
    offset: u64,
    size: u32,
}

impl AllocationHandle {
    /// Refer to an existing record, e.g. one written with `append`
    pub fn new(offset: u64, size: u32) -> Self {
        Self { offset, size }
    }

    /// Logical bundle offset of the record
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Payload size in bytes
    pub fn size(&self) -> u32 {
        self.size
    }
}

// =============================================================================
// Header
// =============================================================================

/// Size information for one segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub name: String,
    pub size: u64,
}

/// Contents of `bundle.hdr`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BundleHeader {
    pub signature: String,
    pub version: u32,
    pub segment_break: u64,
    pub data_size: u64,
    /// Directory the bundle was written to
    pub original_dir: PathBuf,
    pub segments: Vec<SegmentInfo>,
}

impl BundleHeader {
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(HEADER_FILE_NAME)
    }

    pub fn store(&self, pool: &Arc<FilePool>, dir: &Path, permissions: u32) -> Result<()> {
        let encoded = bincode::serialize(self).map_err(|e| StoreError::CorruptBundleHeader {
            path: Self::path(dir),
            reason: format!("encode failed: {}", e),
        })?;
        pool.write_file_with_crc(Self::path(dir), &encoded, permissions)
    }

    pub fn load(pool: &Arc<FilePool>, dir: &Path) -> Result<Self> {
        let path = Self::path(dir);
        let corrupt = |reason: String| StoreError::CorruptBundleHeader {
            path: path.clone(),
            reason,
        };

        let payload = pool
            .read_file_with_crc(&path)?
            .ok_or_else(|| corrupt("checksum mismatch".to_string()))?;

        let header: BundleHeader = bincode::deserialize(&payload)
            .map_err(|e| corrupt(format!("decode failed: {}", e)))?;

        if header.signature != HEADER_SIGNATURE {
            return Err(corrupt(format!("bad signature {:?}", header.signature)));
        }
        if header.version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported version {}", header.version)));
        }
        if header.segment_break == 0 {
            return Err(corrupt("zero segment break".to_string()));
        }
        Ok(header)
    }
}

/// Split a logical offset into (segment number, offset in segment)
pub(crate) fn split_position(position: u64, segment_break: u64) -> (usize, u64) {
    ((position / segment_break) as usize, position % segment_break)
}

/// A record cut short by the end of its segment file is corrupt, not an I/O
/// failure (e.g. an allocation that was never filled)
pub(crate) fn short_read_as_corrupt(err: StoreError, position: u64) -> StoreError {
    match err {
        StoreError::Io(ref io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            StoreError::CorruptRecord { offset: position }
        }
        other => other,
    }
}
