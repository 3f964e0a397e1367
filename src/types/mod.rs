//! Common types used throughout the storage engine.

mod codec;
mod page_id;

pub use codec::{Codec, IndexKey};
pub use page_id::PageId;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default page size in bytes (4KB)
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest supported page size
pub const MIN_PAGE_SIZE: usize = 64;

/// Default buffer pool capacity in pages
pub const DEFAULT_PAGE_COUNT: usize = 1000;

/// Storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Directory holding one file per segment
    pub directory: PathBuf,
    /// Page size in bytes; a power of two, at least [`MIN_PAGE_SIZE`]
    pub page_size: usize,
    /// Maximum number of pages resident in memory at the same time
    pub page_count: usize,
    /// Whether to sync each block write immediately (default: false)
    pub sync_on_write: bool,
}

impl StorageConfig {
    /// Create a new configuration with default settings
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
            page_size: DEFAULT_PAGE_SIZE,
            page_count: DEFAULT_PAGE_COUNT,
            sync_on_write: false,
        }
    }

    /// Set the page size
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the buffer pool capacity in pages
    pub fn page_count(mut self, page_count: usize) -> Self {
        self.page_count = page_count;
        self
    }

    /// Enable sync on write for durability
    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.sync_on_write = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = StorageConfig::new("/tmp/db")
            .page_size(256)
            .page_count(8)
            .sync_on_write(true);

        assert_eq!(config.directory, PathBuf::from("/tmp/db"));
        assert_eq!(config.page_size, 256);
        assert_eq!(config.page_count, 8);
        assert!(config.sync_on_write);
    }

    #[test]
    fn test_config_defaults() {
        let config = StorageConfig::new("x");
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.page_count, DEFAULT_PAGE_COUNT);
        assert!(!config.sync_on_write);
    }
}
