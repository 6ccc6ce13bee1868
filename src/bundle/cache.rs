//! Block Cache
//!
//! Fixed-size blocks of segment data held in LRU order. A read is served
//! from whole blocks, so neighbouring records share one pool read.
//!
//! ```text
//! read(seg 1, 300..340), block 256
//!         ↓
//! blocks (1, 1)        covers 256..512
//!         ↓
//!     CACHED? ──YES──→ copy 44..84 of the block
//!         │
//!         NO → read 256..min(512, segment end), insert, evict LRU
//! ```

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::Result;
use crate::pool::PooledFile;

/// Fewest blocks worth caching; smaller requests disable the cache
pub const MIN_CACHE_BLOCKS: usize = 2;

/// Counters for a bundle's block cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Blocks currently held
    pub blocks: usize,
}

/// (segment, block number within the segment)
type BlockKey = (usize, u64);

pub(crate) struct BlockCache {
    block_size: u64,
    blocks: Mutex<LruCache<BlockKey, Arc<Vec<u8>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BlockCache {
    pub(crate) fn new(max_blocks: NonZeroUsize, block_size: u64) -> Self {
        Self {
            block_size,
            blocks: Mutex::new(LruCache::new(max_blocks)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fill `buf` from segment `segment` starting at `offset`
    ///
    /// `segment_len` bounds the last block; the caller has already checked
    /// that the range lies inside it.
    pub(crate) fn read(
        &self,
        segment: usize,
        file: &PooledFile,
        segment_len: u64,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<()> {
        let mut filled = 0usize;
        while filled < buf.len() {
            let position = offset + filled as u64;
            let number = position / self.block_size;
            let block = self.block(segment, number, file, segment_len)?;

            let start = (position - number * self.block_size) as usize;
            let take = (block.len() - start).min(buf.len() - filled);
            buf[filled..filled + take].copy_from_slice(&block[start..start + take]);
            filled += take;
        }
        Ok(())
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            blocks: self.blocks.lock().len(),
        }
    }

    fn block(
        &self,
        segment: usize,
        number: u64,
        file: &PooledFile,
        segment_len: u64,
    ) -> Result<Arc<Vec<u8>>> {
        if let Some(block) = self.blocks.lock().get(&(segment, number)) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(block));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        // Read outside the lock; a racing reader may load the same block
        let start = number * self.block_size;
        let len = self.block_size.min(segment_len - start) as usize;
        let mut data = vec![0u8; len];
        file.read_exact_at(&mut data, start)?;

        let block = Arc::new(data);
        self.blocks.lock().put((segment, number), Arc::clone(&block));
        Ok(block)
    }
}
