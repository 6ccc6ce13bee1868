//! Index Writer
//!
//! Spools entries in call order to `index.tmp`, then produces the sorted
//! final `index` at close using the cheapest strategy that fits:
//!
//! 1. **Presorted**: entries already arrived in key order; the spool is the
//!    index, so write its header and rename it.
//! 2. **In memory**: the whole spool fits in the sort buffer; sort it and
//!    write the index in one pass.
//! 3. **External merge**: sort buffer-sized runs into `index.sort.tmp`, then
//!    k-way merge them into the index.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::key::SortKey;
use crate::pool::{FilePool, OpenMode, PooledFile};

use super::cursor::{EntryCursor, EntrySink};
use super::merge::{merge_runs, write_sorted_runs};
use super::{entry_size, IndexEntry, IndexHeader, INDEX_FILE_NAME, SORT_FILE_NAME, SPOOL_FILE_NAME};

/// Entries read per block when loading the spool for an in-memory sort
const LOAD_BLOCK_ENTRIES: usize = 64 * 1024;

/// How the final index was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortStrategy {
    /// Input was already in key order
    Presorted,
    /// Sorted in a single in-memory pass
    InMemory,
    /// Sorted in runs, then merged
    ExternalMerge { runs: usize },
}

/// Result of closing an index writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    pub entry_count: u64,
    pub strategy: SortStrategy,
}

/// Writer that accepts entries in any order and emits a sorted index
pub struct IndexWriter<K: SortKey> {
    pool: Arc<FilePool>,
    dir: PathBuf,
    permissions: u32,
    /// Unsorted spool; `None` once closed
    spool: Option<PooledFile>,
    sink: EntrySink<K>,
    /// Whether every entry so far arrived in non-decreasing key order
    presorted: bool,
    last_key: Option<K>,
}

impl<K: SortKey> IndexWriter<K> {
    /// Start an index in `dir`, removing any previous final index
    pub fn create(pool: &Arc<FilePool>, dir: &Path, permissions: u32) -> Result<Self> {
        remove_if_exists(&dir.join(INDEX_FILE_NAME))?;
        let spool = pool.open(dir.join(SPOOL_FILE_NAME), OpenMode::truncate(permissions))?;

        Ok(Self {
            pool: Arc::clone(pool),
            dir: dir.to_path_buf(),
            permissions,
            spool: Some(spool),
            sink: EntrySink::new(0),
            presorted: true,
            last_key: None,
        })
    }

    /// Record an entry (any key order)
    pub fn push(&mut self, entry: IndexEntry<K>) -> Result<()> {
        let spool = self.spool.as_ref().ok_or(StoreError::AlreadyClosed)?;

        if let Some(last) = &self.last_key {
            if entry.key < *last {
                self.presorted = false;
            }
        }
        self.sink.push(spool, &entry)?;
        self.last_key = Some(entry.key);
        Ok(())
    }

    /// Entries recorded so far
    pub fn entry_count(&self) -> u64 {
        self.sink.written()
    }

    /// Path of the final index
    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE_NAME)
    }

    /// Sort the spooled entries into the final index
    ///
    /// `sort_buffer_budget` bounds the bytes of entries held in memory at
    /// once; it is raised to one entry if smaller.
    pub fn close(&mut self, sort_buffer_budget: usize) -> Result<IndexSummary> {
        let spool = self.spool.take().ok_or(StoreError::AlreadyClosed)?;
        self.sink.flush(&spool)?;
        spool.close()?;

        let count = self.sink.written();
        let size = entry_size::<K>();
        let budget = if sort_buffer_budget < size {
            tracing::debug!(
                "Sort buffer {} smaller than one entry, using {}",
                sort_buffer_budget,
                size
            );
            size
        } else {
            sort_buffer_budget
        };

        let spool_path = self.dir.join(SPOOL_FILE_NAME);
        let strategy = if self.presorted {
            self.finish_presorted(&spool_path, count)?;
            SortStrategy::Presorted
        } else if count.saturating_mul(size as u64) <= budget as u64 {
            self.sort_in_memory(&spool_path, count)?;
            SortStrategy::InMemory
        } else {
            let runs = self.sort_external(&spool_path, count, budget / size)?;
            SortStrategy::ExternalMerge { runs }
        };

        tracing::debug!(
            "Closed index {}: {} entries, {:?}",
            self.index_path().display(),
            count,
            strategy
        );

        Ok(IndexSummary {
            entry_count: count,
            strategy,
        })
    }

    // =========================================================================
    // Strategies
    // =========================================================================

    fn finish_presorted(&self, spool_path: &Path, count: u64) -> Result<()> {
        let file = self.pool.open(
            spool_path,
            OpenMode::Write {
                truncate: false,
                permissions: self.permissions,
            },
        )?;
        write_header::<K>(&file, count)?;
        file.close()?;
        fs::rename(spool_path, self.index_path())?;
        Ok(())
    }

    fn sort_in_memory(&self, spool_path: &Path, count: u64) -> Result<()> {
        let spool = self.pool.open(spool_path, OpenMode::Read)?;
        let mut cursor = EntryCursor::<K>::new(0, count, LOAD_BLOCK_ENTRIES);
        let mut entries = Vec::with_capacity(count as usize);
        while let Some(entry) = cursor.next(&spool, spool_path)? {
            entries.push(entry);
        }
        drop(spool);

        // Stable: equal keys keep call order
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        let out = self.create_final()?;
        let mut sink = EntrySink::<K>::new(0);
        for entry in &entries {
            sink.push(&out, entry)?;
        }
        self.finish_final(out, &mut sink, count)?;
        fs::remove_file(spool_path)?;
        Ok(())
    }

    fn sort_external(&self, spool_path: &Path, count: u64, run_entries: usize) -> Result<usize> {
        let runs_path = self.dir.join(SORT_FILE_NAME);
        let runs_file = self
            .pool
            .open(&runs_path, OpenMode::truncate(self.permissions))?;

        let spool = self.pool.open(spool_path, OpenMode::Read)?;
        let runs = write_sorted_runs::<K>(&spool, spool_path, count, run_entries, &runs_file)?;
        drop(spool);
        fs::remove_file(spool_path)?;

        tracing::debug!("Merging {} sorted runs of up to {} entries", runs.len(), run_entries);

        // Share the buffer budget across all run cursors
        let block_entries = (run_entries / runs.len()).max(1);
        let out = self.create_final()?;
        let mut sink = EntrySink::<K>::new(0);
        merge_runs(&runs_file, &runs_path, &runs, block_entries, &out, &mut sink)?;
        self.finish_final(out, &mut sink, count)?;

        drop(runs_file);
        fs::remove_file(&runs_path)?;
        Ok(runs.len())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn create_final(&self) -> Result<PooledFile> {
        self.pool
            .open(self.index_path(), OpenMode::truncate(self.permissions))
    }

    /// Flush entries, sync them, then write the header last
    fn finish_final(&self, out: PooledFile, sink: &mut EntrySink<K>, count: u64) -> Result<()> {
        sink.flush(&out)?;
        out.sync()?;
        write_header::<K>(&out, count)?;
        out.close()
    }
}

impl<K: SortKey> Drop for IndexWriter<K> {
    fn drop(&mut self) {
        if self.spool.is_some() {
            tracing::warn!(
                "Index writer not closed properly: {}",
                self.index_path().display()
            );
        }
    }
}

fn write_header<K: SortKey>(file: &PooledFile, count: u64) -> Result<()> {
    file.write_all_at(&IndexHeader::new::<K>(count).encode(), 0)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
