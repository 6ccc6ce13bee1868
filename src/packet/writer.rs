//! Packet Writer
//!
//! Single-owner writer for a new packet file. Records go to the bundle as
//! they arrive; index entries are spooled in call order and sorted once, at
//! close.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bundle::{AllocationHandle, BundleWriter, HEADER_FILE_NAME, SEGMENT_FILE_PREFIX};
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::index::{IndexEntry, IndexWriter, SORT_FILE_NAME, SPOOL_FILE_NAME};
use crate::key::SortKey;
use crate::pool::FilePool;

use super::WriteSummary;

/// Writer for one packet file directory
pub struct PacketWriter<K: SortKey> {
    target: PathBuf,
    bundle: BundleWriter,
    index: IndexWriter<K>,
    /// Every record stored or reserved: offset -> payload size
    records: HashMap<u64, u32>,
    /// Allocations not yet filled: offset -> payload size
    pending: HashMap<u64, u32>,
    /// Offsets of pending allocations that duplicates already point at
    awaited: BTreeSet<u64>,
    sort_buffer_budget: usize,
    closed: bool,
}

impl<K: SortKey> PacketWriter<K> {
    /// Start a new packet file at `target`
    ///
    /// Any previous packet file there is replaced when `config.overwrite` is
    /// set, otherwise the call fails with [`StoreError::AlreadyExists`].
    pub fn open(pool: &Arc<FilePool>, target: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let target = target.as_ref();
        prepare_target(target, config)?;

        let permissions = config.file_permissions();
        let mut bundle =
            BundleWriter::create(pool, target, config.segment_size_threshold, permissions)?;
        bundle.buffer_writes(config.write_buffer_size)?;
        let index = IndexWriter::create(pool, target, permissions)?;

        tracing::debug!(
            "Opened packet writer at {} (segment break {} bytes)",
            target.display(),
            config.segment_size_threshold
        );

        Ok(Self {
            target: target.to_path_buf(),
            bundle,
            index,
            records: HashMap::new(),
            pending: HashMap::new(),
            awaited: BTreeSet::new(),
            sort_buffer_budget: config.sort_buffer_budget,
            closed: false,
        })
    }

    /// Store a record under `key`, returning its bundle offset
    pub fn append(&mut self, key: K, payload: &[u8]) -> Result<u64> {
        self.append_tagged(key, payload, 0)
    }

    /// [`PacketWriter::append`] with a caller-defined tag
    pub fn append_tagged(&mut self, key: K, payload: &[u8], tag: u32) -> Result<u64> {
        self.check_open()?;
        let size = payload_size(payload)?;
        let offset = self.bundle.append(payload)?;
        self.records.insert(offset, size);
        self.index.push(IndexEntry::new(key, offset, size, tag))?;
        Ok(offset)
    }

    /// Reserve room for a `size`-byte record to be filled later
    ///
    /// No index entry is recorded until the allocation is filled with
    /// [`PacketWriter::write_at`].
    pub fn allocate(&mut self, key: &K, size: u32) -> Result<AllocationHandle> {
        self.check_open()?;
        let handle = self.bundle.allocate(size)?;
        self.records.insert(handle.offset(), size);
        self.pending.insert(handle.offset(), size);
        tracing::trace!("Allocated {} bytes at {} for {:?}", size, handle.offset(), key);
        Ok(handle)
    }

    /// Fill an allocation and record its index entry
    pub fn write_at(&mut self, key: K, payload: &[u8], handle: AllocationHandle) -> Result<()> {
        self.write_at_tagged(key, payload, handle, 0)
    }

    /// [`PacketWriter::write_at`] with a caller-defined tag
    pub fn write_at_tagged(
        &mut self,
        key: K,
        payload: &[u8],
        handle: AllocationHandle,
        tag: u32,
    ) -> Result<()> {
        self.check_open()?;
        match self.pending.get(&handle.offset()) {
            Some(&size) if size == handle.size() => {}
            _ => {
                return Err(StoreError::UnknownAllocation {
                    offset: handle.offset(),
                })
            }
        }

        self.bundle.write_at(handle, payload)?;
        self.pending.remove(&handle.offset());
        self.awaited.remove(&handle.offset());
        self.index
            .push(IndexEntry::new(key, handle.offset(), handle.size(), tag))
    }

    /// Record another key for an existing record without storing it again
    ///
    /// `handle` may come from [`PacketWriter::allocate`] (filled or not yet
    /// filled) or be built from an earlier [`PacketWriter::append`] offset
    /// and payload length. It must name a whole record: an offset that starts
    /// no record fails with [`StoreError::UnknownAllocation`], a size other
    /// than the record's with [`StoreError::AllocationSize`].
    pub fn write_duplicate(&mut self, key: K, handle: AllocationHandle) -> Result<()> {
        self.write_duplicate_tagged(key, handle, 0)
    }

    /// [`PacketWriter::write_duplicate`] with a caller-defined tag
    pub fn write_duplicate_tagged(
        &mut self,
        key: K,
        handle: AllocationHandle,
        tag: u32,
    ) -> Result<()> {
        self.check_open()?;
        match self.records.get(&handle.offset()) {
            Some(&size) if size == handle.size() => {}
            Some(&size) => {
                return Err(StoreError::AllocationSize {
                    expected: size,
                    actual: handle.size() as usize,
                })
            }
            None => {
                return Err(StoreError::UnknownAllocation {
                    offset: handle.offset(),
                })
            }
        }

        if self.pending.contains_key(&handle.offset()) {
            self.awaited.insert(handle.offset());
        }
        self.index
            .push(IndexEntry::new(key, handle.offset(), handle.size(), tag))
    }

    /// Finish the packet file, sorting the index within `sort_buffer_budget`
    /// bytes of memory
    ///
    /// Fails with [`StoreError::UnfilledAllocation`], before anything is
    /// finalized, if a duplicate points at an allocation that was never
    /// filled; the writer stays open so the allocation can still be filled.
    pub fn close(&mut self, sort_buffer_budget: usize) -> Result<WriteSummary> {
        self.check_open()?;
        if let Some(&offset) = self.awaited.iter().next() {
            return Err(StoreError::UnfilledAllocation { offset });
        }
        self.closed = true;

        if !self.pending.is_empty() {
            tracing::warn!(
                "{} allocations in {} were never filled",
                self.pending.len(),
                self.target.display()
            );
        }

        self.bundle.close()?;
        let index = self.index.close(sort_buffer_budget)?;

        let summary = WriteSummary {
            entry_count: index.entry_count,
            data_size: self.bundle.data_size(),
            segment_count: self.bundle.segment_count(),
            strategy: index.strategy,
        };
        tracing::debug!("Closed packet file {}: {:?}", self.target.display(), summary);
        Ok(summary)
    }

    /// [`PacketWriter::close`] with the budget given at open
    pub fn finish(&mut self) -> Result<WriteSummary> {
        self.close(self.sort_buffer_budget)
    }

    /// Entries recorded so far
    pub fn entry_count(&self) -> u64 {
        self.index.entry_count()
    }

    /// Framed bundle bytes reserved so far
    pub fn data_size(&self) -> u64 {
        self.bundle.data_size()
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(StoreError::AlreadyClosed)
        } else {
            Ok(())
        }
    }
}

impl<K: SortKey> Drop for PacketWriter<K> {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!(
                "Packet writer dropped without close, no index written: {}",
                self.target.display()
            );
        }
    }
}

fn payload_size(payload: &[u8]) -> Result<u32> {
    u32::try_from(payload.len()).map_err(|_| StoreError::RecordTooLarge {
        size: payload.len() as u64,
        limit: u32::MAX as u64,
    })
}

/// Create or clear the target directory according to `config`
fn prepare_target(target: &Path, config: &Config) -> Result<()> {
    if !target.is_dir() {
        if !config.create_directories {
            return Err(StoreError::Open {
                path: target.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "target directory missing"),
            });
        }
        DirBuilder::new()
            .recursive(true)
            .mode(config.directory_mode)
            .create(target)
            .map_err(|source| StoreError::Open {
                path: target.to_path_buf(),
                source,
            })?;
        return Ok(());
    }

    if target.join(HEADER_FILE_NAME).exists() && !config.overwrite {
        return Err(StoreError::AlreadyExists(target.to_path_buf()));
    }
    remove_stale_files(target)
}

/// Remove leftovers of an earlier packet file, leaving other files alone
fn remove_stale_files(target: &Path) -> Result<()> {
    for entry in fs::read_dir(target)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };

        let stale = name == SPOOL_FILE_NAME
            || name == SORT_FILE_NAME
            || name
                .strip_prefix(SEGMENT_FILE_PREFIX)
                .and_then(|rest| rest.strip_prefix('.'))
                .map_or(false, |suffix| {
                    suffix.len() == 4 && suffix.bytes().all(|b| b.is_ascii_digit())
                });
        if stale {
            tracing::debug!("Removing stale {}", entry.path().display());
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
