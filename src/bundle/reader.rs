//! Bundle Reader
//!
//! Random-access reads of framed records from a closed bundle. Shareable
//! across threads: every read goes through the descriptor pool, or through
//! the optional block cache.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::{self, CRC_SIZE};
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::manifest::{FileRole, ManifestEntry};
use crate::pool::{FilePool, OpenMode, PooledFile};

use super::cache::{BlockCache, CacheStats, MIN_CACHE_BLOCKS};
use super::{short_read_as_corrupt, split_position, BundleHeader, HEADER_FILE_NAME};

/// Reader for a closed bundle
pub struct BundleReader {
    dir: PathBuf,
    header: BundleHeader,
    segments: Vec<PooledFile>,
    cache: Option<BlockCache>,
}

impl BundleReader {
    /// Open the bundle in `dir`, validating its header
    pub fn open(pool: &Arc<FilePool>, dir: &Path) -> Result<Self> {
        let header = BundleHeader::load(pool, dir)?;

        let mut segments = Vec::with_capacity(header.segments.len());
        for info in &header.segments {
            segments.push(pool.open(dir.join(&info.name), OpenMode::Read)?);
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            header,
            segments,
            cache: None,
        })
    }

    /// [`BundleReader::open`], then apply the read cache settings in `config`
    pub fn open_with_config(pool: &Arc<FilePool>, dir: &Path, config: &Config) -> Result<Self> {
        let mut reader = Self::open(pool, dir)?;
        reader.enable_read_cache(config.read_cache_blocks, config.read_cache_block_size)?;
        Ok(reader)
    }

    /// Serve reads from up to `max_blocks` cached blocks of `block_size` bytes
    ///
    /// Replaces any existing cache. Fewer than two blocks turns caching off.
    pub fn enable_read_cache(&mut self, max_blocks: usize, block_size: u32) -> Result<()> {
        if max_blocks < MIN_CACHE_BLOCKS {
            self.cache = None;
            return Ok(());
        }
        if block_size == 0 {
            return Err(StoreError::Config("read cache block size must be non-zero".to_string()));
        }

        let capacity = NonZeroUsize::new(max_blocks)
            .ok_or_else(|| StoreError::Config("read cache needs at least one block".to_string()))?;
        self.cache = Some(BlockCache::new(capacity, block_size as u64));
        tracing::debug!(
            "Bundle {} read cache: {} blocks of {} bytes",
            self.dir.display(),
            max_blocks,
            block_size
        );
        Ok(())
    }

    /// Hit and miss counts, if the read cache is enabled
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(BlockCache::stats)
    }

    /// Read and validate the record at `position`
    pub fn read_at(&self, position: u64, size: u32) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_into(position, size, &mut buf)?;
        Ok(buf)
    }

    /// Like [`BundleReader::read_at`], reusing `buf`
    pub fn read_into(&self, position: u64, size: u32, buf: &mut Vec<u8>) -> Result<()> {
        let (segment, offset) = split_position(position, self.header.segment_break);
        let framed_len = size as u64 + CRC_SIZE as u64;

        let segment_len = match self.header.segments.get(segment) {
            Some(info) if offset + framed_len <= info.size => info.size,
            _ => return Err(StoreError::CorruptRecord { offset: position }),
        };

        buf.clear();
        buf.resize(framed_len as usize, 0);
        let file = &self.segments[segment];
        let read = match &self.cache {
            Some(cache) => cache.read(segment, file, segment_len, offset, buf),
            None => file.read_exact_at(buf, offset),
        };
        read.map_err(|e| short_read_as_corrupt(e, position))?;

        if codec::decode(buf).is_none() {
            return Err(StoreError::CorruptRecord { offset: position });
        }
        buf.truncate(size as usize);
        Ok(())
    }

    /// Total framed bytes stored
    pub fn data_size(&self) -> u64 {
        self.header.data_size
    }

    pub fn segment_break(&self) -> u64 {
        self.header.segment_break
    }

    pub fn segment_count(&self) -> usize {
        self.header.segments.len()
    }

    /// Directory the bundle was written to
    pub fn original_dir(&self) -> &Path {
        &self.header.original_dir
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Manifest entries for the header and every segment
    pub fn manifest(&self) -> Result<Vec<ManifestEntry>> {
        let header_path = self.dir.join(HEADER_FILE_NAME);
        let mut entries = Vec::with_capacity(self.segments.len() + 1);
        entries.push(ManifestEntry {
            role: FileRole::BundleHeader,
            original_path: self.header.original_dir.join(HEADER_FILE_NAME),
            size: std::fs::metadata(&header_path)?.len(),
            current_path: header_path,
        });

        for (n, info) in self.header.segments.iter().enumerate() {
            entries.push(ManifestEntry {
                role: FileRole::BundleSegment(n as u32),
                original_path: self.header.original_dir.join(&info.name),
                current_path: self.dir.join(&info.name),
                size: info.size,
            });
        }
        Ok(entries)
    }
}
