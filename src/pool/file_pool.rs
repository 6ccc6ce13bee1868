//! File Pool
//!
//! Owns the descriptor budget and the LRU of real descriptors.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::codec;
use crate::config::Config;
use crate::error::{Result, StoreError};

use super::{OpenMode, PooledFile};

/// Identifier of a logical file inside one pool
pub(crate) type FileId = u64;

/// Bounded pool of real file descriptors shared by many logical files
///
/// Create one per process (or per test) and pass it around as
/// `Arc<FilePool>`.
///
/// ```ignore
/// let pool = FilePool::new(64)?;
/// let file = pool.open("data/bundle.0000", OpenMode::Read)?;
/// let mut buf = [0u8; 16];
/// file.read_exact_at(&mut buf, 0)?;
/// ```
pub struct FilePool {
    /// Max real descriptors open at once
    budget: usize,

    /// All mutable state, serialized under one lock
    state: Mutex<PoolState>,
}

struct PoolState {
    /// Every registered logical file
    files: HashMap<FileId, LogicalFile>,

    /// Real descriptors, least-recently-used at the back
    open: LruCache<FileId, File>,

    /// Next logical file id
    next_id: FileId,

    /// High-water mark of `open.len()`
    max_used: usize,
}

/// Bookkeeping for one logical file
struct LogicalFile {
    path: PathBuf,
    writable: bool,
    /// Creation flags still to apply (cleared after the first real open)
    first_open: Option<(bool, u32)>,
    /// Error from closing this file during eviction, reported on next access
    close_error: Option<io::Error>,
}

impl FilePool {
    /// Create a pool that keeps at most `budget` descriptors open
    pub fn new(budget: usize) -> Result<Arc<Self>> {
        if budget == 0 {
            return Err(StoreError::Config(
                "descriptor budget must be at least 1".to_string(),
            ));
        }

        tracing::debug!("Creating file pool: budget={}", budget);

        Ok(Arc::new(Self {
            budget,
            state: Mutex::new(PoolState {
                files: HashMap::new(),
                open: LruCache::unbounded(),
                next_id: 1,
                max_used: 0,
            }),
        }))
    }

    /// Create a pool with `config.descriptor_budget`
    pub fn from_config(config: &Config) -> Result<Arc<Self>> {
        Self::new(config.descriptor_budget)
    }

    /// Create a pool sized from the process limit, leaving `reserve`
    /// descriptors for the rest of the program (minimum budget 1)
    pub fn with_system_limit(reserve: usize) -> Result<Arc<Self>> {
        let limit = system_descriptor_limit().ok_or_else(|| {
            StoreError::Config("unable to query RLIMIT_NOFILE".to_string())
        })?;
        Self::new(limit.saturating_sub(reserve).max(1))
    }

    /// Register a logical file and open it once
    ///
    /// The initial open is eager so missing files and permission problems
    /// surface here rather than on first read.
    pub fn open(self: &Arc<Self>, path: impl AsRef<Path>, mode: OpenMode) -> Result<PooledFile> {
        let path = path.as_ref().to_path_buf();
        let first_open = match mode {
            OpenMode::Read => None,
            OpenMode::Write {
                truncate,
                permissions,
            } => Some((truncate, permissions)),
        };

        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.files.insert(
            id,
            LogicalFile {
                path: path.clone(),
                writable: mode.is_writable(),
                first_open,
                close_error: None,
            },
        );

        if let Err(e) = self.ensure_open(&mut state, id) {
            state.files.remove(&id);
            return Err(e);
        }

        Ok(PooledFile::new(Arc::clone(self), id, path, mode.is_writable()))
    }

    // =========================================================================
    // Whole-file helpers
    // =========================================================================

    /// Write `payload` plus a CRC trailer as the whole contents of `path`
    pub fn write_file_with_crc(
        self: &Arc<Self>,
        path: impl AsRef<Path>,
        payload: &[u8],
        permissions: u32,
    ) -> Result<()> {
        let file = self.open(path, OpenMode::truncate(permissions))?;
        file.write_all_at(&codec::encode(payload), 0)?;
        file.close()
    }

    /// Read a file written by [`FilePool::write_file_with_crc`]
    ///
    /// Returns `None` inside `Ok` when the CRC does not match, so callers can
    /// report corruption against their own file type.
    pub fn read_file_with_crc(self: &Arc<Self>, path: impl AsRef<Path>) -> Result<Option<Vec<u8>>> {
        let file = self.open(path, OpenMode::Read)?;
        let size = file.file_size()? as usize;
        let mut buf = vec![0u8; size];
        file.read_exact_at(&mut buf, 0)?;
        file.close()?;

        let payload_len = match codec::decode(&buf) {
            Some(payload) => payload.len(),
            None => return Ok(None),
        };
        buf.truncate(payload_len);
        Ok(Some(buf))
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Max real descriptors this pool may hold
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Real descriptors currently open
    pub fn open_descriptors(&self) -> usize {
        self.state.lock().open.len()
    }

    /// Highest number of real descriptors ever open at once
    pub fn max_descriptors_used(&self) -> usize {
        self.state.lock().max_used
    }

    /// Logical files currently registered
    pub fn logical_files(&self) -> usize {
        self.state.lock().files.len()
    }

    // =========================================================================
    // Operations used by PooledFile
    // =========================================================================

    pub(crate) fn read_at(&self, id: FileId, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut state = self.state.lock();
        let file = self.ensure_open(&mut state, id)?;
        Ok(file.read_at(buf, offset)?)
    }

    pub(crate) fn read_exact_at(&self, id: FileId, buf: &mut [u8], offset: u64) -> Result<()> {
        let mut state = self.state.lock();
        let file = self.ensure_open(&mut state, id)?;
        Ok(file.read_exact_at(buf, offset)?)
    }

    pub(crate) fn write_all_at(&self, id: FileId, buf: &[u8], offset: u64) -> Result<()> {
        let mut state = self.state.lock();
        let file = self.ensure_open(&mut state, id)?;
        Ok(file.write_all_at(buf, offset)?)
    }

    pub(crate) fn file_size(&self, id: FileId) -> Result<u64> {
        let mut state = self.state.lock();
        let file = self.ensure_open(&mut state, id)?;
        Ok(file.metadata()?.len())
    }

    pub(crate) fn sync(&self, id: FileId) -> Result<()> {
        let mut state = self.state.lock();
        let file = self.ensure_open(&mut state, id)?;
        Ok(file.sync_data()?)
    }

    /// Forget a logical file, closing its descriptor if it has one
    ///
    /// With `sync` set, a writable file is synced before closing and any
    /// deferred close error is reported.
    pub(crate) fn release(&self, id: FileId, sync: bool) -> Result<()> {
        let mut state = self.state.lock();
        let logical = state.files.remove(&id);
        let file = state.open.pop(&id);

        let Some(logical) = logical else {
            return Ok(());
        };
        if sync {
            if let Some(e) = logical.close_error {
                return Err(StoreError::Io(e));
            }
            if let (Some(file), true) = (&file, logical.writable) {
                file.sync_all()?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Private Helpers (pool lock held)
    // =========================================================================

    /// Return the real descriptor for `id`, opening it (and evicting the LRU
    /// descriptor if the budget is full) when needed
    fn ensure_open<'a>(&self, state: &'a mut PoolState, id: FileId) -> Result<&'a File> {
        let logical = state.files.get_mut(&id).ok_or(StoreError::AlreadyClosed)?;
        if let Some(e) = logical.close_error.take() {
            return Err(StoreError::Io(e));
        }

        if !state.open.contains(&id) {
            self.open_real(state, id)?;
        }

        // `get` also marks the descriptor most-recently-used
        state.open.get(&id).ok_or(StoreError::AlreadyClosed)
    }

    fn open_real(&self, state: &mut PoolState, id: FileId) -> Result<()> {
        while state.open.len() >= self.budget {
            let Some((victim, file)) = state.open.pop_lru() else {
                break;
            };
            Self::evict(state, victim, file);
        }

        let logical = state.files.get_mut(&id).ok_or(StoreError::AlreadyClosed)?;

        let mut options = OpenOptions::new();
        options.read(true);
        if logical.writable {
            options.write(true);
        }
        if let Some((truncate, permissions)) = logical.first_open {
            options.create(true).truncate(truncate).mode(permissions);
        }

        let file = options.open(&logical.path).map_err(|source| StoreError::Open {
            path: logical.path.clone(),
            source,
        })?;

        // Never truncate or recreate on later reopens
        logical.first_open = None;

        state.open.put(id, file);
        state.max_used = state.max_used.max(state.open.len());
        Ok(())
    }

    /// Close an evicted descriptor, deferring any error to its owner
    fn evict(state: &mut PoolState, victim: FileId, file: File) {
        let Some(logical) = state.files.get_mut(&victim) else {
            return;
        };

        tracing::trace!("Evicting descriptor for {}", logical.path.display());

        if logical.writable {
            if let Err(e) = file.sync_data() {
                logical.close_error = Some(e);
            }
        }
        drop(file);
    }
}

/// Current soft limit on open files for this process
fn system_descriptor_limit() -> Option<usize> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit only writes into the struct we pass
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    if rc != 0 {
        return None;
    }
    Some(limit.rlim_cur.min(usize::MAX as libc::rlim_t) as usize)
}
