//! Reader Pool
//!
//! Registry of open packet files addressed by small tokens. One bundle
//! reader is kept per target and shared by every caller; all descriptors
//! come from a single [`FilePool`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::bundle::{BundleReader, CacheStats};
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::key::SortKey;
use crate::manifest::ManifestEntry;
use crate::pool::FilePool;

use super::reader::{manifest_for, PacketReader};

/// Handle to a packet file registered with a [`ReaderPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderToken(u64);

impl ReaderToken {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReaderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Registered {
    target: PathBuf,
    bundle: Arc<BundleReader>,
}

#[derive(Default)]
struct Registry {
    next_token: u64,
    by_token: HashMap<u64, Registered>,
    by_target: HashMap<PathBuf, u64>,
}

/// Shared random-access readers for many packet files
///
/// # Thread Safety
/// - `RwLock` guards only the registry; reads clone the bundle `Arc` under a
///   read lock and do their I/O after releasing it
/// - Descriptor use is bounded by the shared [`FilePool`]
pub struct ReaderPool {
    files: Arc<FilePool>,
    /// Applied to every bundle opened by [`ReaderPool::add`]
    config: Config,
    registry: RwLock<Registry>,
}

impl ReaderPool {
    pub fn new(files: Arc<FilePool>) -> Self {
        Self::with_config(files, Config::default())
    }

    /// Pool whose bundles use the read cache settings in `config`
    pub fn with_config(files: Arc<FilePool>, config: Config) -> Self {
        Self {
            files,
            config,
            registry: RwLock::new(Registry::default()),
        }
    }

    /// Register the packet file at `target`
    ///
    /// Registering the same directory again (by any path that resolves to
    /// it) returns the existing token.
    pub fn add(&self, target: impl AsRef<Path>) -> Result<ReaderToken> {
        let target = std::fs::canonicalize(target.as_ref()).map_err(|source| StoreError::Open {
            path: target.as_ref().to_path_buf(),
            source,
        })?;

        if let Some(&token) = self.registry.read().by_target.get(&target) {
            return Ok(ReaderToken(token));
        }

        let bundle = Arc::new(BundleReader::open_with_config(
            &self.files,
            &target,
            &self.config,
        )?);

        let mut registry = self.registry.write();
        // Another thread may have registered it while the bundle was opening
        if let Some(&token) = registry.by_target.get(&target) {
            return Ok(ReaderToken(token));
        }

        let token = registry.next_token;
        registry.next_token += 1;
        registry.by_target.insert(target.clone(), token);
        tracing::debug!("Registered {} as reader {}", target.display(), token);
        registry.by_token.insert(token, Registered { target, bundle });
        Ok(ReaderToken(token))
    }

    /// Fetch a record by bundle offset and payload size
    pub fn read_at(&self, token: ReaderToken, offset: u64, size: u32) -> Result<Vec<u8>> {
        let (_, bundle) = self.lookup(token)?;
        bundle.read_at(offset, size)
    }

    /// Like [`ReaderPool::read_at`], reusing `buf`
    pub fn read_into(
        &self,
        token: ReaderToken,
        offset: u64,
        size: u32,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        let (_, bundle) = self.lookup(token)?;
        bundle.read_into(offset, size, buf)
    }

    /// Sequential reader over a registered packet file, sharing its bundle
    pub fn open_reader<K: SortKey>(&self, token: ReaderToken) -> Result<PacketReader<K>> {
        let (target, bundle) = self.lookup(token)?;
        PacketReader::with_bundle(&self.files, &target, bundle)
    }

    /// Physical files backing a registered packet file
    pub fn manifest(&self, token: ReaderToken) -> Result<Vec<ManifestEntry>> {
        let (target, bundle) = self.lookup(token)?;
        manifest_for(&target, &bundle)
    }

    /// Forget a registered packet file
    ///
    /// Readers already handed out keep working; the bundle's descriptors are
    /// released once the last of them is dropped.
    pub fn remove(&self, token: ReaderToken) -> Result<()> {
        let mut registry = self.registry.write();
        let removed = registry
            .by_token
            .remove(&token.0)
            .ok_or(StoreError::UnknownToken(token.0))?;
        registry.by_target.remove(&removed.target);
        Ok(())
    }

    /// Number of registered packet files
    pub fn len(&self) -> usize {
        self.registry.read().by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn file_pool(&self) -> &Arc<FilePool> {
        &self.files
    }

    /// Read cache counters of a registered packet file's bundle
    pub fn cache_stats(&self, token: ReaderToken) -> Result<Option<CacheStats>> {
        let (_, bundle) = self.lookup(token)?;
        Ok(bundle.cache_stats())
    }

    fn lookup(&self, token: ReaderToken) -> Result<(PathBuf, Arc<BundleReader>)> {
        let registry = self.registry.read();
        let registered = registry
            .by_token
            .get(&token.0)
            .ok_or(StoreError::UnknownToken(token.0))?;
        Ok((registered.target.clone(), Arc::clone(&registered.bundle)))
    }
}
