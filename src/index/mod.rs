//! Index Module
//!
//! Fixed-size, individually checksummed entries pointing into a bundle,
//! sorted by key when the writer closes.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (24 bytes)                                            │
//! │   Magic "PKIX" (4) | Version u16 (2) | KeyWidth u16 (2)      │
//! │   EntryCount u64 (8) | Flags u32 (4) | HeaderCRC u32 (4)     │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Entries (KeyWidth + 20 bytes each)                           │
//! │   [Key][Offset u64][Size u32][Tag u32][EntryCRC u32]         │
//! │   ... repeated EntryCount times, non-decreasing by key ...   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//! All integers are little-endian. The header is written after every entry
//! is on disk, so an interrupted write never yields a valid header.

mod cursor;
mod merge;
mod reader;
mod writer;

use std::path::Path;
use std::sync::Arc;

use crate::codec::{self, CRC_SIZE};
use crate::error::{Result, StoreError};
use crate::key::SortKey;
use crate::pool::{FilePool, OpenMode};

pub use reader::{Entries, IndexReader};
pub use writer::{IndexSummary, IndexWriter, SortStrategy};

// =============================================================================
// Shared Constants
// =============================================================================

/// Final index file name inside a packet file directory
pub const INDEX_FILE_NAME: &str = "index";

/// Unsorted spool written while ingesting
pub const SPOOL_FILE_NAME: &str = "index.tmp";

/// Sorted runs written during an external merge
pub const SORT_FILE_NAME: &str = "index.sort.tmp";

/// Magic bytes identifying an index file
pub(crate) const MAGIC: &[u8; 4] = b"PKIX";

/// Current index format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + KeyWidth (2) + Count (8) + Flags (4) + CRC (4)
pub const HEADER_SIZE: u64 = 24;

/// Flag: bundle records carry CRC trailers
pub(crate) const FLAG_DATA_HAS_CRC: u32 = 1;

/// Entry bytes besides the key: Offset (8) + Size (4) + Tag (4) + CRC (4)
const ENTRY_FIXED_SIZE: usize = 8 + 4 + 4 + CRC_SIZE;

/// Stored size of one entry for key type `K`
pub fn entry_size<K: SortKey>() -> usize {
    K::WIDTH + ENTRY_FIXED_SIZE
}

// =============================================================================
// Index Entry
// =============================================================================

/// One index entry: where a record with `key` lives in the bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry<K> {
    pub key: K,
    /// Logical bundle offset
    pub offset: u64,
    /// Payload size, excluding the CRC trailer
    pub size: u32,
    /// Caller-defined value, stored but never interpreted
    pub tag: u32,
}

impl<K: SortKey> IndexEntry<K> {
    pub fn new(key: K, offset: u64, size: u32, tag: u32) -> Self {
        Self {
            key,
            offset,
            size,
            tag,
        }
    }

    /// Encode into `buf` (exactly `entry_size::<K>()` bytes), CRC included
    pub(crate) fn encode_into(&self, buf: &mut [u8]) {
        let w = K::WIDTH;
        self.key.encode(&mut buf[..w]);
        buf[w..w + 8].copy_from_slice(&self.offset.to_le_bytes());
        buf[w + 8..w + 12].copy_from_slice(&self.size.to_le_bytes());
        buf[w + 12..w + 16].copy_from_slice(&self.tag.to_le_bytes());
        codec::frame_in_place(buf);
    }

    /// Decode from `buf`; `None` if the entry CRC does not match
    pub(crate) fn decode(buf: &[u8]) -> Option<Self> {
        let body = codec::decode(buf)?;
        let w = K::WIDTH;
        Some(Self {
            key: K::decode(&body[..w]),
            offset: u64::from_le_bytes(body[w..w + 8].try_into().ok()?),
            size: u32::from_le_bytes(body[w + 8..w + 12].try_into().ok()?),
            tag: u32::from_le_bytes(body[w + 12..w + 16].try_into().ok()?),
        })
    }
}

// =============================================================================
// Index Header
// =============================================================================

/// Decoded index header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub key_width: u16,
    pub entry_count: u64,
    pub flags: u32,
}

impl IndexHeader {
    pub(crate) fn new<K: SortKey>(entry_count: u64) -> Self {
        Self {
            key_width: K::WIDTH as u16,
            entry_count,
            flags: FLAG_DATA_HAS_CRC,
        }
    }

    /// Whether bundle records carry CRC trailers
    pub fn data_has_crc(&self) -> bool {
        self.flags & FLAG_DATA_HAS_CRC != 0
    }

    /// Stored size of one entry in this index
    pub fn entry_size(&self) -> usize {
        self.key_width as usize + ENTRY_FIXED_SIZE
    }

    pub(crate) fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..6].copy_from_slice(&VERSION.to_le_bytes());
        buf[6..8].copy_from_slice(&self.key_width.to_le_bytes());
        buf[8..16].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[16..20].copy_from_slice(&self.flags.to_le_bytes());
        codec::frame_in_place(&mut buf);
        buf
    }

    /// Decode and validate; the error string says what was wrong
    pub(crate) fn decode(buf: &[u8]) -> std::result::Result<Self, String> {
        if buf.len() < HEADER_SIZE as usize {
            return Err(format!("file too short for header ({} bytes)", buf.len()));
        }
        let body = codec::decode(&buf[..HEADER_SIZE as usize])
            .ok_or_else(|| "header checksum mismatch".to_string())?;

        if &body[0..4] != MAGIC {
            return Err(format!("invalid magic {:?}", &body[0..4]));
        }
        let version = u16::from_le_bytes([body[4], body[5]]);
        if version != VERSION {
            return Err(format!("unsupported version {}", version));
        }

        let mut count = [0u8; 8];
        count.copy_from_slice(&body[8..16]);
        Ok(Self {
            key_width: u16::from_le_bytes([body[6], body[7]]),
            entry_count: u64::from_le_bytes(count),
            flags: u32::from_le_bytes([body[16], body[17], body[18], body[19]]),
        })
    }
}

/// Read and validate just the header of an index file
///
/// Useful for tools that need the key width before choosing a key type.
pub fn probe_header(pool: &Arc<FilePool>, path: &Path) -> Result<IndexHeader> {
    let file = pool.open(path, OpenMode::Read)?;
    let mut buf = [0u8; HEADER_SIZE as usize];
    let read = file.read_at(&mut buf, 0)?;
    IndexHeader::decode(&buf[..read]).map_err(|reason| StoreError::CorruptHeader {
        path: path.to_path_buf(),
        reason,
    })
}
