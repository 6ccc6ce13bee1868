//! Buffered entry I/O
//!
//! `EntryCursor` reads a range of entries block by block, checking each
//! entry's CRC. `EntrySink` batches encoded entries into large positional
//! writes. Neither owns the file, so several cursors can share one handle.

use std::marker::PhantomData;
use std::path::Path;

use crate::error::{Result, StoreError};
use crate::key::SortKey;
use crate::pool::PooledFile;

use super::{entry_size, IndexEntry, HEADER_SIZE};

/// Write batch size for sinks
const SINK_BUFFER_SIZE: usize = 1024 * 1024;

/// Sequential reader over entries `[next, end)` of an index-layout file
pub(crate) struct EntryCursor<K> {
    /// Next entry to return
    next: u64,
    /// One past the last entry to return
    end: u64,
    /// Entries fetched per read
    block_entries: usize,
    /// Raw bytes of entries `[buf_start, buf_start + buf_entries)`
    buf: Vec<u8>,
    buf_start: u64,
    buf_entries: usize,
    _key: PhantomData<K>,
}

impl<K: SortKey> EntryCursor<K> {
    pub fn new(start: u64, count: u64, block_entries: usize) -> Self {
        Self {
            next: start,
            end: start.saturating_add(count),
            block_entries: block_entries.max(1),
            buf: Vec::new(),
            buf_start: start,
            buf_entries: 0,
            _key: PhantomData,
        }
    }

    /// Entry index the next call returns
    pub fn position(&self) -> u64 {
        self.next
    }

    pub fn remaining(&self) -> u64 {
        self.end - self.next
    }

    /// Move to entry `index` (clamped to the range end)
    pub fn seek(&mut self, index: u64) {
        self.next = index.min(self.end);
    }

    /// Next entry, or `None` at the end of the range
    ///
    /// `path` only labels corruption errors.
    pub fn next(&mut self, file: &PooledFile, path: &Path) -> Result<Option<IndexEntry<K>>> {
        if self.next >= self.end {
            return Ok(None);
        }

        let in_buffer =
            self.next >= self.buf_start && self.next < self.buf_start + self.buf_entries as u64;
        if !in_buffer {
            self.fill(file)?;
        }

        let size = entry_size::<K>();
        let slot = (self.next - self.buf_start) as usize;
        let raw = &self.buf[slot * size..(slot + 1) * size];
        let index = self.next;
        self.next += 1;

        IndexEntry::decode(raw)
            .map(Some)
            .ok_or_else(|| StoreError::CorruptEntry {
                path: path.to_path_buf(),
                index,
            })
    }

    fn fill(&mut self, file: &PooledFile) -> Result<()> {
        let size = entry_size::<K>();
        let entries = (self.end - self.next).min(self.block_entries as u64) as usize;
        self.buf.resize(entries * size, 0);
        file.read_exact_at(&mut self.buf, entry_position::<K>(self.next))?;
        self.buf_start = self.next;
        self.buf_entries = entries;
        Ok(())
    }
}

/// Buffered appender of encoded entries
pub(crate) struct EntrySink<K> {
    /// File offset of the next flushed byte
    position: u64,
    buf: Vec<u8>,
    written: u64,
    _key: PhantomData<K>,
}

impl<K: SortKey> EntrySink<K> {
    /// Start writing at entry index `start`
    pub fn new(start: u64) -> Self {
        Self {
            position: entry_position::<K>(start),
            buf: Vec::with_capacity(SINK_BUFFER_SIZE),
            written: 0,
            _key: PhantomData,
        }
    }

    pub fn push(&mut self, file: &PooledFile, entry: &IndexEntry<K>) -> Result<()> {
        let size = entry_size::<K>();
        let at = self.buf.len();
        self.buf.resize(at + size, 0);
        entry.encode_into(&mut self.buf[at..]);
        self.written += 1;

        if self.buf.len() >= SINK_BUFFER_SIZE {
            self.flush(file)?;
        }
        Ok(())
    }

    pub fn flush(&mut self, file: &PooledFile) -> Result<()> {
        if !self.buf.is_empty() {
            file.write_all_at(&self.buf, self.position)?;
            self.position += self.buf.len() as u64;
            self.buf.clear();
        }
        Ok(())
    }

    /// Entries pushed so far
    pub fn written(&self) -> u64 {
        self.written
    }
}

/// File offset of entry `index`
pub(crate) fn entry_position<K: SortKey>(index: u64) -> u64 {
    HEADER_SIZE + index * entry_size::<K>() as u64
}

/// [`entry_position`], or `None` past `u64::MAX`
pub(crate) fn checked_entry_position<K: SortKey>(index: u64) -> Option<u64> {
    index
        .checked_mul(entry_size::<K>() as u64)
        .and_then(|bytes| bytes.checked_add(HEADER_SIZE))
}
