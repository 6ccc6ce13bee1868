//! # packstore
//!
//! Write-once record storage for very large numbers of small records:
//! - Bundles: append-only record data split into size-bounded segments
//! - Indexes: key-sorted, per-entry checksummed catalogs into a bundle
//! - External merge sort so indexes larger than memory still sort
//! - A descriptor pool so thousands of open files fit a small fd budget
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          PacketWriter              PacketReader / ReaderPool │
//! └───────────┬───────────────┬─────────────┬───────────────────┘
//!             │               │             │
//!             ▼               ▼             ▼
//!   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//!   │ BundleWriter │  │ IndexWriter  │  │ IndexReader  │
//!   │  (segments)  │  │ (spool+sort) │  │ BundleReader │
//!   └──────┬───────┘  └──────┬───────┘  └──────┬───────┘
//!          │                 │                 │
//!          └─────────────────┼─────────────────┘
//!                            ▼
//!                   ┌─────────────────┐
//!                   │    FilePool     │
//!                   │ (LRU, ≤ budget) │
//!                   └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod bundle;
pub mod codec;
pub mod index;
pub mod key;
pub mod manifest;
pub mod packet;
pub mod pool;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use bundle::{AllocationHandle, CacheStats};
pub use config::Config;
pub use error::{Result, StoreError};
pub use index::{IndexEntry, SortStrategy};
pub use key::SortKey;
pub use manifest::{FileRole, ManifestEntry};
pub use packet::{PacketReader, PacketWriter, ReaderPool, ReaderToken, WriteSummary};
pub use pool::{FilePool, OpenMode, PooledFile};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of packstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
