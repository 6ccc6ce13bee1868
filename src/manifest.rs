//! Manifest
//!
//! Lists the physical files backing a packet file so packaging, copy and
//! verification tools can move them around without knowing the layout.

use std::fmt;
use std::path::PathBuf;

/// What a physical file is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    /// The sorted index
    Index,
    /// The bundle header (`bundle.hdr`)
    BundleHeader,
    /// A bundle segment, by segment number
    BundleSegment(u32),
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileRole::Index => write!(f, "index"),
            FileRole::BundleHeader => write!(f, "bundle-header"),
            FileRole::BundleSegment(n) => write!(f, "segment-{}", n),
        }
    }
}

/// One physical file backing a packet file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub role: FileRole,
    /// Where the file was written
    pub original_path: PathBuf,
    /// Where the file is now
    pub current_path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

impl ManifestEntry {
    /// Whether the file has moved since it was written
    pub fn is_relocated(&self) -> bool {
        self.original_path != self.current_path
    }
}

/// Total bytes across a manifest
pub fn total_size(manifest: &[ManifestEntry]) -> u64 {
    manifest.iter().map(|entry| entry.size).sum()
}
