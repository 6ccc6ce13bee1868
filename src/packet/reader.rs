//! Packet Reader
//!
//! Walks a closed packet file in key order, fetching each record from the
//! bundle and verifying its checksum.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bundle::BundleReader;
use crate::config::Config;
use crate::error::Result;
use crate::index::{IndexEntry, IndexReader, INDEX_FILE_NAME};
use crate::key::SortKey;
use crate::manifest::{FileRole, ManifestEntry};
use crate::pool::FilePool;

/// Sequential reader for one packet file
pub struct PacketReader<K: SortKey> {
    target: PathBuf,
    index: IndexReader<K>,
    bundle: Arc<BundleReader>,
}

impl<K: SortKey> PacketReader<K> {
    /// Open the packet file at `target`
    pub fn open(pool: &Arc<FilePool>, target: impl AsRef<Path>) -> Result<Self> {
        let target = target.as_ref();
        let bundle = Arc::new(BundleReader::open(pool, target)?);
        Self::with_bundle(pool, target, bundle)
    }

    /// Open the packet file at `target` with the read cache from `config`
    pub fn open_with_config(
        pool: &Arc<FilePool>,
        target: impl AsRef<Path>,
        config: &Config,
    ) -> Result<Self> {
        let target = target.as_ref();
        let bundle = Arc::new(BundleReader::open_with_config(pool, target, config)?);
        Self::with_bundle(pool, target, bundle)
    }

    /// Open the index at `target` over an already-open bundle
    pub(crate) fn with_bundle(
        pool: &Arc<FilePool>,
        target: &Path,
        bundle: Arc<BundleReader>,
    ) -> Result<Self> {
        let index = IndexReader::open(pool, &target.join(INDEX_FILE_NAME))?;
        Ok(Self {
            target: target.to_path_buf(),
            index,
            bundle,
        })
    }

    /// Read the next record into `buf`
    ///
    /// Returns the record's key and size, or `None` once every entry has
    /// been read.
    pub fn read_next(&mut self, buf: &mut Vec<u8>) -> Result<Option<(K, u32)>> {
        match self.next_entry()? {
            Some(entry) => {
                self.bundle.read_into(entry.offset, entry.size, buf)?;
                Ok(Some((entry.key, entry.size)))
            }
            None => Ok(None),
        }
    }

    /// Next index entry without touching the bundle
    pub fn next_entry(&mut self) -> Result<Option<IndexEntry<K>>> {
        if self.index.remaining() == 0 {
            return Ok(None);
        }
        self.index.read_next().map(Some)
    }

    /// Iterate over the remaining records as (entry, payload) pairs
    pub fn records(&mut self) -> Records<'_, K> {
        Records { reader: self }
    }

    /// Fetch the record an entry points at
    pub fn read_entry(&self, entry: &IndexEntry<K>) -> Result<Vec<u8>> {
        self.bundle.read_at(entry.offset, entry.size)
    }

    /// Fetch a record by bundle offset and payload size
    pub fn read_at(&self, offset: u64, size: u32) -> Result<Vec<u8>> {
        self.bundle.read_at(offset, size)
    }

    /// Number of index entries
    pub fn count(&self) -> u64 {
        self.index.count()
    }

    pub fn remaining(&self) -> u64 {
        self.index.remaining()
    }

    /// Reposition so the next read returns entry `index`
    pub fn seek(&mut self, index: u64) -> Result<()> {
        self.index.seek(index)
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn bundle(&self) -> &BundleReader {
        &self.bundle
    }

    /// Physical files backing this packet file
    pub fn manifest(&self) -> Result<Vec<ManifestEntry>> {
        manifest_for(&self.target, &self.bundle)
    }
}

/// Index file plus every bundle file for `target`
pub(crate) fn manifest_for(target: &Path, bundle: &BundleReader) -> Result<Vec<ManifestEntry>> {
    let index_path = target.join(INDEX_FILE_NAME);
    let mut entries = vec![ManifestEntry {
        role: FileRole::Index,
        original_path: bundle.original_dir().join(INDEX_FILE_NAME),
        size: std::fs::metadata(&index_path)?.len(),
        current_path: index_path,
    }];
    entries.extend(bundle.manifest()?);
    Ok(entries)
}

/// Iterator returned by [`PacketReader::records`]
pub struct Records<'a, K: SortKey> {
    reader: &'a mut PacketReader<K>,
}

impl<K: SortKey> Iterator for Records<'_, K> {
    type Item = Result<(IndexEntry<K>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.reader.next_entry() {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => return Some(Err(e)),
        };
        Some(
            self.reader
                .read_entry(&entry)
                .map(|payload| (entry, payload)),
        )
    }
}
