//! Bundle Writer
//!
//! Appends and pre-allocates framed records, rotating segments at the
//! configured break. The header is written once, on close.
//!
//! With [`BundleWriter::buffer_writes`] consecutive writes to the same
//! segment are gathered in memory and written as one. A write that does not
//! continue the buffered run, or would overflow it, flushes it first; a write
//! larger than the whole buffer bypasses it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::{self, CRC_SIZE};
use crate::error::{Result, StoreError};
use crate::pool::{FilePool, OpenMode, PooledFile};

use super::{
    segment_file_name, split_position, AllocationHandle, BundleHeader, SegmentInfo,
    FORMAT_VERSION, HEADER_SIGNATURE, SEGMENT_COUNT_MAX,
};

/// A segment being written
struct WriterSegment {
    name: String,
    file: PooledFile,
    /// Bytes reserved so far (written or allocated)
    size: u64,
}

/// Contiguous bytes waiting to be written to one segment
struct WriteBuffer {
    capacity: usize,
    segment: usize,
    /// Segment offset of `bytes[0]`
    start: u64,
    bytes: Vec<u8>,
}

impl WriteBuffer {
    fn end(&self) -> u64 {
        self.start + self.bytes.len() as u64
    }

    /// Buffered copy of `len` bytes at `offset`, if held entirely here
    fn get(&self, segment: usize, offset: u64, len: u64) -> Option<&[u8]> {
        if segment != self.segment || offset < self.start || offset + len > self.end() {
            return None;
        }
        let from = (offset - self.start) as usize;
        Some(&self.bytes[from..from + len as usize])
    }
}

/// Writer for a new bundle
pub struct BundleWriter {
    pool: Arc<FilePool>,
    dir: PathBuf,
    segment_break: u64,
    permissions: u32,
    segments: Vec<WriterSegment>,
    /// Segments created, still counted after close
    segment_count: usize,
    /// Total framed bytes reserved across all segments
    data_size: u64,
    write_buffer: Option<WriteBuffer>,
    closed: bool,
}

impl BundleWriter {
    /// Start a new bundle in `dir` (which must exist)
    ///
    /// Creates the first, empty segment. Any existing header is removed so a
    /// writer that never closes cannot leave a stale bundle behind.
    pub fn create(
        pool: &Arc<FilePool>,
        dir: &Path,
        segment_break: u64,
        permissions: u32,
    ) -> Result<Self> {
        if segment_break <= CRC_SIZE as u64 {
            return Err(StoreError::Config(format!(
                "segment break {} too small",
                segment_break
            )));
        }

        match fs::remove_file(BundleHeader::path(dir)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut writer = Self {
            pool: Arc::clone(pool),
            dir: dir.to_path_buf(),
            segment_break,
            permissions,
            segments: Vec::new(),
            segment_count: 0,
            data_size: 0,
            write_buffer: None,
            closed: false,
        };
        writer.create_segment()?;
        Ok(writer)
    }

    /// Append a record, returning its logical offset
    pub fn append(&mut self, payload: &[u8]) -> Result<u64> {
        let framed = codec::encode(payload);
        let position = self.reserve(framed.len() as u64)?;
        let (segment, offset) = split_position(position, self.segment_break);
        self.write_to_segment(segment, offset, &framed)?;
        Ok(position)
    }

    /// Reserve room for a record of `size` bytes without writing it
    pub fn allocate(&mut self, size: u32) -> Result<AllocationHandle> {
        let position = self.reserve(size as u64 + CRC_SIZE as u64)?;
        Ok(AllocationHandle::new(position, size))
    }

    /// Fill a previously allocated range
    pub fn write_at(&mut self, handle: AllocationHandle, payload: &[u8]) -> Result<()> {
        self.check_open()?;
        if payload.len() != handle.size() as usize {
            return Err(StoreError::AllocationSize {
                expected: handle.size(),
                actual: payload.len(),
            });
        }

        let (segment, offset) = split_position(handle.offset(), self.segment_break);
        if !self.contains(handle) {
            return Err(StoreError::UnknownAllocation {
                offset: handle.offset(),
            });
        }
        self.write_to_segment(segment, offset, &codec::encode(payload))
    }

    /// Gather writes in a buffer of `capacity` bytes (0 turns buffering off)
    ///
    /// Anything already buffered is written out first.
    pub fn buffer_writes(&mut self, capacity: usize) -> Result<()> {
        self.flush_write_buffer()?;
        self.write_buffer = (capacity > 0).then(|| WriteBuffer {
            capacity,
            segment: 0,
            start: 0,
            bytes: Vec::with_capacity(capacity),
        });
        Ok(())
    }

    /// Write out any buffered bytes
    pub fn flush_write_buffer(&mut self) -> Result<()> {
        let Some(buffer) = self.write_buffer.as_mut() else {
            return Ok(());
        };
        if buffer.bytes.is_empty() {
            return Ok(());
        }
        self.segments[buffer.segment]
            .file
            .write_all_at(&buffer.bytes, buffer.start)?;
        buffer.bytes.clear();
        Ok(())
    }

    /// Bytes written but not yet flushed to a segment file
    pub fn buffered_bytes(&self) -> usize {
        self.write_buffer.as_ref().map_or(0, |b| b.bytes.len())
    }

    /// Whether `handle` lies within space this writer has reserved
    pub fn contains(&self, handle: AllocationHandle) -> bool {
        let (segment, offset) = split_position(handle.offset(), self.segment_break);
        let framed_end = offset + handle.size() as u64 + CRC_SIZE as u64;
        self.segments
            .get(segment)
            .map_or(false, |seg| framed_end <= seg.size)
    }

    /// Read back a record written by this writer
    pub fn read_at(&self, position: u64, size: u32) -> Result<Vec<u8>> {
        let (segment, offset) = split_position(position, self.segment_break);
        let framed_len = size as u64 + CRC_SIZE as u64;
        let target = self
            .segments
            .get(segment)
            .filter(|seg| offset + framed_len <= seg.size)
            .ok_or(StoreError::CorruptRecord { offset: position })?;

        let buffered = self
            .write_buffer
            .as_ref()
            .and_then(|b| b.get(segment, offset, framed_len));
        let mut framed = match buffered {
            Some(bytes) => bytes.to_vec(),
            None => {
                let mut framed = vec![0u8; framed_len as usize];
                target
                    .file
                    .read_exact_at(&mut framed, offset)
                    .map_err(|e| super::short_read_as_corrupt(e, position))?;
                framed
            }
        };
        match codec::decode(&framed) {
            Some(_) => {
                framed.truncate(size as usize);
                Ok(framed)
            }
            None => Err(StoreError::CorruptRecord { offset: position }),
        }
    }

    /// Sync all segments and write the bundle header
    pub fn close(&mut self) -> Result<()> {
        self.check_open()?;
        self.flush_write_buffer()?;
        self.write_buffer = None;
        self.closed = true;

        let mut infos = Vec::with_capacity(self.segments.len());
        for segment in self.segments.drain(..) {
            infos.push(SegmentInfo {
                name: segment.name,
                size: segment.size,
            });
            segment.file.close()?;
        }

        let header = BundleHeader {
            signature: HEADER_SIGNATURE.to_string(),
            version: FORMAT_VERSION,
            segment_break: self.segment_break,
            data_size: self.data_size,
            original_dir: fs::canonicalize(&self.dir)?,
            segments: infos,
        };
        header.store(&self.pool, &self.dir, self.permissions)?;

        tracing::debug!(
            "Closed bundle {}: {} bytes in {} segments",
            self.dir.display(),
            header.data_size,
            header.segments.len()
        );
        Ok(())
    }

    /// Total framed bytes reserved (records plus CRC trailers)
    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    /// Number of segment files created so far
    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    pub fn segment_break(&self) -> u64 {
        self.segment_break
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(StoreError::AlreadyClosed)
        } else {
            Ok(())
        }
    }

    fn write_to_segment(&mut self, segment: usize, offset: u64, data: &[u8]) -> Result<()> {
        let direct = self
            .write_buffer
            .as_ref()
            .map_or(true, |b| data.len() > b.capacity);
        if direct {
            return self.segments[segment].file.write_all_at(data, offset);
        }

        let continues = self.write_buffer.as_ref().map_or(false, |b| {
            b.segment == segment && b.end() == offset && b.bytes.len() + data.len() <= b.capacity
        });
        if !continues {
            self.flush_write_buffer()?;
        }

        if let Some(buffer) = self.write_buffer.as_mut() {
            if buffer.bytes.is_empty() {
                buffer.segment = segment;
                buffer.start = offset;
            }
            buffer.bytes.extend_from_slice(data);
        }
        Ok(())
    }

    /// Reserve `framed_len` bytes at the logical end, rotating if needed
    fn reserve(&mut self, framed_len: u64) -> Result<u64> {
        self.check_open()?;
        if framed_len > self.segment_break {
            return Err(StoreError::RecordTooLarge {
                size: framed_len,
                limit: self.segment_break,
            });
        }

        let needs_rotation = self
            .segments
            .last()
            .map_or(true, |seg| seg.size + framed_len > self.segment_break);
        if needs_rotation {
            self.create_segment()?;
        }

        let index = self.segments.len() - 1;
        let segment = &mut self.segments[index];
        let position = index as u64 * self.segment_break + segment.size;
        segment.size += framed_len;
        self.data_size += framed_len;
        Ok(position)
    }

    fn create_segment(&mut self) -> Result<()> {
        let number = self.segments.len() as u32;
        if number >= SEGMENT_COUNT_MAX {
            return Err(StoreError::TooManySegments {
                max: SEGMENT_COUNT_MAX,
            });
        }

        let name = segment_file_name(number);
        let file = self
            .pool
            .open(self.dir.join(&name), OpenMode::truncate(self.permissions))?;

        tracing::debug!("Bundle {} added segment {}", self.dir.display(), name);

        self.segments.push(WriterSegment {
            name,
            file,
            size: 0,
        });
        self.segment_count += 1;
        Ok(())
    }
}

impl Drop for BundleWriter {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(
                "Bundle writer not closed properly, header not written: {}",
                self.dir.display()
            );
        }
    }
}
