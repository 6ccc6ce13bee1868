//! Index Reader
//!
//! Sequential access to a closed index. The header is validated at open;
//! each entry's checksum is validated as it is read, so a damaged entry is
//! reported by position without hiding the rest of the file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::key::SortKey;
use crate::pool::{FilePool, OpenMode, PooledFile};

use super::cursor::{checked_entry_position, EntryCursor};
use super::{IndexEntry, IndexHeader, HEADER_SIZE};

/// Entries fetched per read
const READ_BLOCK_ENTRIES: usize = 4096;

/// Reader over the entries of one index file
pub struct IndexReader<K: SortKey> {
    path: PathBuf,
    file: PooledFile,
    header: IndexHeader,
    cursor: EntryCursor<K>,
}

impl<K: SortKey> IndexReader<K> {
    /// Open `path` and validate its header against key type `K`
    pub fn open(pool: &Arc<FilePool>, path: &Path) -> Result<Self> {
        let file = pool.open(path, OpenMode::Read)?;

        let mut raw = [0u8; HEADER_SIZE as usize];
        let read = file.read_at(&mut raw, 0)?;
        let header =
            IndexHeader::decode(&raw[..read]).map_err(|reason| StoreError::CorruptHeader {
                path: path.to_path_buf(),
                reason,
            })?;

        if header.key_width as usize != K::WIDTH {
            return Err(StoreError::KeyWidthMismatch {
                expected: K::WIDTH,
                found: header.key_width as usize,
            });
        }

        // A count too large to address can never be backed by the file
        let expected = checked_entry_position::<K>(header.entry_count).unwrap_or(u64::MAX);
        let found = file.file_size()?;
        if found < expected {
            return Err(StoreError::TruncatedIndex {
                path: path.to_path_buf(),
                expected,
                found,
            });
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
            cursor: EntryCursor::new(0, header.entry_count, READ_BLOCK_ENTRIES),
        })
    }

    /// Number of entries in the index
    pub fn count(&self) -> u64 {
        self.header.entry_count
    }

    /// Entries not yet read
    pub fn remaining(&self) -> u64 {
        self.cursor.remaining()
    }

    /// Index of the entry the next read returns
    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    pub fn header(&self) -> &IndexHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reposition so the next read returns entry `index`
    ///
    /// Seeking to `count()` is allowed and leaves nothing to read.
    pub fn seek(&mut self, index: u64) -> Result<()> {
        if index > self.count() {
            return Err(StoreError::ReadPastEnd { count: self.count() });
        }
        self.cursor.seek(index);
        Ok(())
    }

    /// Read the next entry
    pub fn read_next(&mut self) -> Result<IndexEntry<K>> {
        self.cursor
            .next(&self.file, &self.path)?
            .ok_or(StoreError::ReadPastEnd { count: self.count() })
    }

    /// Iterate over the remaining entries
    pub fn entries(&mut self) -> Entries<'_, K> {
        Entries { reader: self }
    }
}

/// Iterator returned by [`IndexReader::entries`]
pub struct Entries<'a, K: SortKey> {
    reader: &'a mut IndexReader<K>,
}

impl<K: SortKey> Iterator for Entries<'_, K> {
    type Item = Result<IndexEntry<K>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.remaining() == 0 {
            return None;
        }
        Some(self.reader.read_next())
    }
}
