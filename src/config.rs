//! Configuration for the photo index

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::IndexError;

/// Default scan cache lifetime in seconds
pub const DEFAULT_SCAN_CACHE_TTL_SECS: u64 = 5;

/// Upper bound for the scan cache lifetime in seconds
pub const MAX_SCAN_CACHE_TTL_SECS: u64 = 3600;

/// Default number of records returned by a listing
pub const DEFAULT_LIMIT: usize = 200;

/// Largest number of records a listing may return
pub const MAX_LIMIT: usize = 2000;

/// Configuration for a photo library
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directory holding the photos; every key is relative to it
    pub root: PathBuf,

    /// JSON document persisting capture times.
    /// If `None`, capture times are only cached in memory
    pub metadata_path: Option<PathBuf>,

    /// File extensions to include (lowercase, without dot)
    pub extensions: HashSet<String>,

    /// How long a directory scan may be reused, in seconds.
    /// 0 disables the scan cache
    pub scan_cache_ttl_secs: u64,

    /// Whether dot-files and dot-directories are excluded
    pub skip_hidden: bool,

    /// Whether listings descend into subdirectories by default
    pub recursive: bool,

    /// Number of threads used for metadata extraction
    /// 0 means auto-detect (CPU cores)
    pub num_threads: usize,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("uploads"),
            metadata_path: None,
            extensions: Self::default_extensions(),
            scan_cache_ttl_secs: DEFAULT_SCAN_CACHE_TTL_SECS,
            skip_hidden: true,
            recursive: true,
            num_threads: 0,
        }
    }
}

impl LibraryConfig {
    /// Create a new config for the given photo root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Create a config builder
    pub fn builder() -> LibraryConfigBuilder {
        LibraryConfigBuilder::new()
    }

    /// Load a config document written as JSON
    pub fn from_json_file(path: &Path) -> Result<Self, IndexError> {
        let json = std::fs::read_to_string(path).map_err(|e| IndexError::from(e).at(path))?;
        let config: Self = serde_json::from_str(&json).map_err(|e| IndexError::from(e).at(path))?;
        Ok(config)
    }

    /// Get the default image extensions
    pub fn default_extensions() -> HashSet<String> {
        ["jpg", "jpeg", "png", "gif", "webp"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Check if an extension should be included
    pub fn should_include_extension(&self, ext: &str) -> bool {
        self.extensions.contains(&ext.to_lowercase())
    }

    /// Get the scan cache lifetime, clamped to one hour
    pub fn scan_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.scan_cache_ttl_secs.min(MAX_SCAN_CACHE_TTL_SECS))
    }

    /// Get the effective number of threads
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            self.num_threads
        }
    }
}

/// Builder for LibraryConfig
#[derive(Debug, Default)]
pub struct LibraryConfigBuilder {
    config: LibraryConfig,
}

impl LibraryConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the photo root
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.root = root.into();
        self
    }

    /// Set the capture-time document path
    pub fn metadata_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.metadata_path = Some(path.into());
        self
    }

    /// Set the extensions whitelist
    pub fn extensions(mut self, extensions: HashSet<String>) -> Self {
        self.config.extensions = extensions;
        self
    }

    /// Set the scan cache lifetime in seconds
    pub fn scan_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.config.scan_cache_ttl_secs = secs;
        self
    }

    /// Include or exclude hidden entries
    pub fn skip_hidden(mut self, enabled: bool) -> Self {
        self.config.skip_hidden = enabled;
        self
    }

    /// Enable or disable recursive listings by default
    pub fn recursive(mut self, enabled: bool) -> Self {
        self.config.recursive = enabled;
        self
    }

    /// Set the number of threads
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.config.num_threads = threads;
        self
    }

    /// Build the config
    pub fn build(self) -> LibraryConfig {
        self.config
    }
}
