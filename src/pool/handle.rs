//! Pooled file handle
//!
//! A logical open file. Its slot in the pool is released on every exit path:
//! explicitly through [`PooledFile::close`] or implicitly on drop.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;

use super::file_pool::{FileId, FilePool};

/// Logical file handle backed by a [`FilePool`]
///
/// The real descriptor may be closed and reopened by the pool at any time;
/// callers never notice because every operation names its offset.
pub struct PooledFile {
    pool: Arc<FilePool>,
    id: FileId,
    path: PathBuf,
    writable: bool,
    released: bool,
}

impl PooledFile {
    pub(crate) fn new(pool: Arc<FilePool>, id: FileId, path: PathBuf, writable: bool) -> Self {
        Self {
            pool,
            id,
            path,
            writable,
            released: false,
        }
    }

    /// Path this handle was opened with
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this handle was opened for writing
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// The pool serving this handle
    pub fn pool(&self) -> &Arc<FilePool> {
        &self.pool
    }

    /// Read up to `buf.len()` bytes at `offset`, returning the count read
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.pool.read_at(self.id, buf, offset)
    }

    /// Read exactly `buf.len()` bytes at `offset`
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.pool.read_exact_at(self.id, buf, offset)
    }

    /// Write all of `buf` at `offset`
    pub fn write_all_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        self.pool.write_all_at(self.id, buf, offset)
    }

    /// Current size of the underlying file
    pub fn file_size(&self) -> Result<u64> {
        self.pool.file_size(self.id)
    }

    /// Flush written data to disk
    pub fn sync(&self) -> Result<()> {
        self.pool.sync(self.id)
    }

    /// Release the handle, syncing writable files and reporting close errors
    pub fn close(mut self) -> Result<()> {
        self.released = true;
        self.pool.release(self.id, true)
    }
}

impl Drop for PooledFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.pool.release(self.id, false) {
            tracing::warn!("Error releasing {}: {}", self.path.display(), e);
        }
    }
}

impl fmt::Debug for PooledFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledFile")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("writable", &self.writable)
            .finish()
    }
}
