use std::path::PathBuf;

/// Capacity used when a store is opened with a requested size of zero.
pub const DEFAULT_FILE_SIZE: u64 = 2 * 1024 * 1024;

/// Largest capacity a store may be opened with.
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Default payload capacity of one physical block.
pub const DEFAULT_BLOCK_SIZE: u64 = 32 * 1024;

/// Configuration for a FIFO block store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the backing file
    pub path: PathBuf,

    /// Requested capacity in bytes, descriptors included (default: 2MB)
    pub file_size: u64,

    /// Payload bytes per physical block (default: 32KB)
    pub block_size: u64,

    /// Upper bound for `file_size` (default: 100MB)
    pub max_file_size: u64,

    /// Call `sync_data` on flush (default: true)
    pub sync_on_flush: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./offline.dat"),
            file_size: DEFAULT_FILE_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            max_file_size: MAX_FILE_SIZE,
            sync_on_flush: true,
        }
    }
}

impl StoreConfig {
    /// Create a new config for the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set the requested file capacity. Zero selects the default.
    pub fn file_size(mut self, size: u64) -> Self {
        self.file_size = size;
        self
    }

    /// Set the payload size of one block
    pub fn block_size(mut self, size: u64) -> Self {
        self.block_size = size;
        self
    }

    /// Set the ceiling for the requested capacity
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Enable or disable `sync_data` on flush
    pub fn sync_on_flush(mut self, enabled: bool) -> Self {
        self.sync_on_flush = enabled;
        self
    }

    pub(crate) fn effective_file_size(&self) -> u64 {
        if self.file_size == 0 {
            DEFAULT_FILE_SIZE
        } else {
            self.file_size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.path, PathBuf::from("./offline.dat"));
        assert_eq!(config.file_size, 2 * 1024 * 1024);
        assert_eq!(config.block_size, 32 * 1024);
        assert_eq!(config.max_file_size, 100 * 1024 * 1024);
        assert!(config.sync_on_flush);
    }

    #[test]
    fn test_config_builder() {
        let config = StoreConfig::new("/tmp/test.dat")
            .file_size(4096)
            .block_size(64)
            .max_file_size(8192)
            .sync_on_flush(false);

        assert_eq!(config.path, PathBuf::from("/tmp/test.dat"));
        assert_eq!(config.file_size, 4096);
        assert_eq!(config.block_size, 64);
        assert_eq!(config.max_file_size, 8192);
        assert!(!config.sync_on_flush);
    }

    #[test]
    fn test_zero_size_uses_default() {
        let config = StoreConfig::new("/tmp/test.dat").file_size(0);
        assert_eq!(config.effective_file_size(), DEFAULT_FILE_SIZE);
    }
}
