//! Packet File Module
//!
//! A packet file is a directory holding one bundle and one index over it.
//!
//! ## Write Flow
//! ```text
//!   append / allocate + write_at / write_duplicate
//!        │                         │
//!        ▼                         ▼
//!   bundle.NNNN (payload+crc)   index.tmp (entries, call order)
//!                                  │  close()
//!                                  ▼
//!                 presorted rename │ in-memory sort │ external merge
//!                                  ▼
//!                               index (sorted, header written last)
//! ```
//!
//! ## Read Flow
//! [`PacketReader`] walks the index in key order and fetches each record
//! from the bundle. [`ReaderPool`] shares one bundle reader per target among
//! many callers and hands out lightweight tokens.

mod reader;
mod reader_pool;
mod writer;

pub use reader::{PacketReader, Records};
pub use reader_pool::{ReaderPool, ReaderToken};
pub use writer::PacketWriter;

use crate::index::SortStrategy;

/// What a closed packet file contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    /// Index entries, duplicates included
    pub entry_count: u64,
    /// Framed bundle bytes (payloads plus CRC trailers)
    pub data_size: u64,
    pub segment_count: usize,
    /// How the index was sorted
    pub strategy: SortStrategy,
}
