//! Configuration for packstore
//!
//! Centralized configuration with sensible defaults.

/// Main configuration for a packet-file writer and its descriptor pool
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Descriptor Pool Configuration
    // -------------------------------------------------------------------------
    /// Max real file descriptors the pool keeps open at once
    pub descriptor_budget: usize,

    // -------------------------------------------------------------------------
    // Writer Configuration
    // -------------------------------------------------------------------------
    /// Create the target directory (and parents) if missing
    pub create_directories: bool,

    /// Permission bits for created directories
    pub directory_mode: u32,

    /// Permission bits for created files (execute bits are always stripped)
    pub file_mode: u32,

    /// Replace an existing packet file at the target instead of failing
    pub overwrite: bool,

    /// Max bytes per bundle segment file before rotating
    pub segment_size_threshold: u64,

    /// Memory available for sorting index entries at close (in bytes)
    pub sort_buffer_budget: usize,

    /// Bytes of appended records held in memory before writing (0 = off)
    pub write_buffer_size: usize,

    // -------------------------------------------------------------------------
    // Reader Configuration
    // -------------------------------------------------------------------------
    /// Blocks in each bundle's read cache (below 2 = off)
    pub read_cache_blocks: usize,

    /// Size of one read cache block (in bytes)
    pub read_cache_block_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            descriptor_budget: 256,
            create_directories: true,
            directory_mode: 0o755,
            file_mode: 0o644,
            overwrite: true,
            segment_size_threshold: 1024 * 1024 * 1024, // 1 GB
            sort_buffer_budget: 64 * 1024 * 1024,       // 64 MB
            write_buffer_size: 0,
            read_cache_blocks: 0,
            read_cache_block_size: 1024 * 1024, // 1 MB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// File permission bits with execute stripped
    pub(crate) fn file_permissions(&self) -> u32 {
        self.file_mode & !0o111
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the descriptor budget for the pool
    pub fn descriptor_budget(mut self, budget: usize) -> Self {
        self.config.descriptor_budget = budget;
        self
    }

    /// Create missing target directories
    pub fn create_directories(mut self, create: bool) -> Self {
        self.config.create_directories = create;
        self
    }

    /// Set the mode for created directories
    pub fn directory_mode(mut self, mode: u32) -> Self {
        self.config.directory_mode = mode;
        self
    }

    /// Set the mode for created files
    pub fn file_mode(mut self, mode: u32) -> Self {
        self.config.file_mode = mode;
        self
    }

    /// Allow replacing an existing packet file
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.config.overwrite = overwrite;
        self
    }

    /// Set the bundle segment size threshold (in bytes)
    pub fn segment_size_threshold(mut self, size: u64) -> Self {
        self.config.segment_size_threshold = size;
        self
    }

    /// Set the sort buffer budget (in bytes)
    pub fn sort_buffer_budget(mut self, size: usize) -> Self {
        self.config.sort_buffer_budget = size;
        self
    }

    /// Buffer appended records up to `size` bytes per write
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.config.write_buffer_size = size;
        self
    }

    /// Enable a read cache of `blocks` blocks of `block_size` bytes
    pub fn read_cache(mut self, blocks: usize, block_size: u32) -> Self {
        self.config.read_cache_blocks = blocks;
        self.config.read_cache_block_size = block_size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
