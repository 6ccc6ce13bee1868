//! Descriptor Pool Module
//!
//! Lets an unbounded number of logical open files share a bounded number of
//! real OS file descriptors.
//!
//! ## Responsibilities
//! - Hand out logical handles ([`PooledFile`]) on demand
//! - Keep at most `budget` real descriptors open
//! - Close the least-recently-used descriptor when the budget is full
//! - Reopen transparently on the next access
//!
//! ## Concurrency
//! ```text
//!   thread A ──┐                    ┌── LRU: [id3, id7, id1]  (≤ budget)
//!   thread B ──┼──► Mutex<PoolState>┤
//!   thread C ──┘                    └── files: id → path, flags
//! ```
//! Every operation (open, pread, pwrite, evict, close) runs under one pool-wide
//! lock. Critical sections are bookkeeping plus a single syscall. All I/O is
//! offset-explicit, so a file closed and reopened by the pool reads and writes
//! exactly as if it had stayed open.

mod file_pool;
mod handle;

pub use file_pool::FilePool;
pub use handle::PooledFile;

/// How a logical file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only; the file must already exist
    Read,

    /// Read-write; created with `permissions` if missing
    ///
    /// `truncate` and creation only apply to the first real open. Later
    /// reopens after eviction never truncate or recreate the file.
    Write { truncate: bool, permissions: u32 },
}

impl OpenMode {
    /// Read-write mode that truncates on first open
    pub fn truncate(permissions: u32) -> Self {
        OpenMode::Write {
            truncate: true,
            permissions,
        }
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, OpenMode::Write { .. })
    }
}
