//! Load Configuration
//!
//! Tunables for scanning and lazy completion. Defaults suit interactive
//! browsing; `from_env` lets a host override them without recompiling.

use std::env;
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// Graphs whose encoded region is larger than this stay lazy after scanning.
pub const DEFAULT_LAZY_GRAPH_THRESHOLD: u64 = 64 * 1024;

/// Buffer size for the binary reader.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8192;

/// Bytes pulled from a socket per read.
pub const DEFAULT_NETWORK_BUFFER_SIZE: usize = 8192;

/// Longest length-prefixed string or blob accepted from a dump.
pub const DEFAULT_MAX_BLOCK_LEN: usize = 256 * 1024 * 1024;

/// Unused extracted archive members kept on disk.
pub const DEFAULT_ZIP_CACHE_MEMBERS: usize = 4;

#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub lazy_graph_threshold: u64,
    pub read_buffer_size: usize,
    pub network_buffer_size: usize,
    /// Longest string or blob the reader accepts.
    pub max_block_len: usize,
    pub zip_cache_members: NonZeroUsize,
    /// Directory for archive extractions and spill files (system temp if unset).
    pub temp_dir: Option<PathBuf>,
    /// Compare the pool at the end of every re-parse with the scanner's.
    pub verify_pools: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        LoadConfig {
            lazy_graph_threshold: DEFAULT_LAZY_GRAPH_THRESHOLD,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            network_buffer_size: DEFAULT_NETWORK_BUFFER_SIZE,
            max_block_len: DEFAULT_MAX_BLOCK_LEN,
            zip_cache_members: NonZeroUsize::new(DEFAULT_ZIP_CACHE_MEMBERS)
                .unwrap_or(NonZeroUsize::MIN),
            temp_dir: None,
            verify_pools: cfg!(debug_assertions),
        }
    }
}

impl LoadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `GRAPHDUMP_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_value::<u64>("GRAPHDUMP_LAZY_GRAPH_THRESHOLD") {
            config.lazy_graph_threshold = v;
        }
        if let Some(v) = env_value::<usize>("GRAPHDUMP_NETWORK_BUFFER") {
            config.network_buffer_size = v.max(1);
        }
        if let Some(v) = env_value::<usize>("GRAPHDUMP_MAX_BLOCK") {
            config.max_block_len = v;
        }
        if let Some(v) = env_value::<usize>("GRAPHDUMP_ZIP_CACHE") {
            if let Some(n) = NonZeroUsize::new(v) {
                config.zip_cache_members = n;
            }
        }
        if let Some(v) = env_value::<bool>("GRAPHDUMP_VERIFY_POOLS") {
            config.verify_pools = v;
        }
        if let Ok(dir) = env::var("GRAPHDUMP_TEMP_DIR") {
            config.temp_dir = Some(PathBuf::from(dir));
        }
        config
    }

    pub fn with_lazy_graph_threshold(mut self, bytes: u64) -> Self {
        self.lazy_graph_threshold = bytes;
        self
    }

    pub fn with_read_buffer_size(mut self, bytes: usize) -> Self {
        self.read_buffer_size = bytes.max(16);
        self
    }

    pub fn with_network_buffer_size(mut self, bytes: usize) -> Self {
        self.network_buffer_size = bytes.max(1);
        self
    }

    pub fn with_max_block_len(mut self, bytes: usize) -> Self {
        self.max_block_len = bytes;
        self
    }

    pub fn with_zip_cache_members(mut self, members: NonZeroUsize) -> Self {
        self.zip_cache_members = members;
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn with_verify_pools(mut self, verify: bool) -> Self {
        self.verify_pools = verify;
        self
    }
}

fn env_value<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring {}={:?}: not a valid value", name, raw);
            None
        }
    }
}
