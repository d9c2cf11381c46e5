//! File lifecycle: open, validation, recreation and growth.

use super::block::PhysicalBlock;
use super::fifo::{Cursor, FifoStore, FileState};
use super::file::BlockFile;
use super::header::{FileHeader, HEADER_SIZE};
use super::index::LogicalIndex;
use super::table::BlockTable;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::Error;

use std::path::Path;

impl FifoStore {
    /// Opens `path` with a requested capacity of `size` bytes (zero selects
    /// the default) and `block_size` payload bytes per block.
    pub fn open(&mut self, path: impl AsRef<Path>, size: u64, block_size: u64) -> Result<()> {
        let config = StoreConfig::new(path.as_ref())
            .file_size(size)
            .block_size(block_size);
        self.open_with_config(config)
    }

    /// Opens the store described by `config`. An existing file that fails
    /// validation is recreated empty.
    pub fn open_with_config(&mut self, config: StoreConfig) -> Result<()> {
        if self.state != FileState::Closed {
            tracing::error!(path = ?self.config.path, "Store already open");
            return Err(Error::AlreadyOpen);
        }
        if config.block_size == 0 || config.block_size > u32::MAX as u64 {
            return Err(Error::InvalidArgument(format!(
                "block size {} is out of range",
                config.block_size
            )));
        }
        let requested = config.effective_file_size();
        if requested > config.max_file_size {
            tracing::error!(
                requested = requested,
                max = config.max_file_size,
                "Requested file size too large"
            );
            return Err(Error::SizeTooLarge {
                requested,
                max: config.max_file_size,
            });
        }

        tracing::info!(
            path = ?config.path,
            size = requested,
            block_size = config.block_size,
            "Opening store"
        );
        self.config = config;

        let file = match BlockFile::open_existing(&self.config.path) {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!(error = %e, "No readable store file, creating one");
                return self.recreate();
            }
        };
        self.file = Some(file);
        self.state = FileState::Open;

        if let Err(e) = self.load() {
            tracing::warn!(path = ?self.config.path, error = %e, "Store file unusable, truncating");
            return self.recreate();
        }

        tracing::info!(
            items = self.index.len(),
            blocks = self.header.physical_block_count,
            "Store opened"
        );
        Ok(())
    }

    /// Reads and validates the header, loads the descriptors, repairs chains
    /// and rebuilds the index.
    fn load(&mut self) -> Result<()> {
        let file = self.file.as_mut().ok_or(Error::NotOpen)?;

        let header = file.read_header()?;
        header.validate(file.size()?)?;
        if header.stride() > self.config.max_file_size {
            tracing::warn!(
                block_size = header.block_size,
                max = self.config.max_file_size,
                "Stored block size exceeds the file size limit"
            );
            return Err(Error::InvalidHeader);
        }
        if header.block_size != self.config.block_size {
            tracing::info!(
                stored = header.block_size,
                requested = self.config.block_size,
                "Keeping block size of existing file"
            );
        }

        let (mut table, sanitized) = BlockTable::load(file, &header)?;
        let broken = table.check_blocks();
        let (index, orphaned) = table.build_index();

        let repaired = sanitized + broken + orphaned;
        if repaired > 0 {
            tracing::warn!(
                sanitized = sanitized,
                broken = broken,
                orphaned = orphaned,
                "Reclaimed inconsistent blocks"
            );
            if let Err(e) = table.write_all(file) {
                tracing::warn!(error = %e, "Failed to persist repaired descriptors");
            }
        }

        self.header = header;
        self.table = table;
        self.index = index;
        self.cursor = Cursor::Unset;
        Ok(())
    }

    /// Truncates the file and writes a header describing zero blocks. The
    /// file grows to its requested capacity on first write.
    pub(super) fn recreate(&mut self) -> Result<()> {
        self.file = None;
        let path = self.config.path.clone();

        let mut file = match BlockFile::create(&path) {
            Ok(file) => file,
            Err(e) => {
                tracing::error!(path = ?path, error = %e, "Cannot create store file");
                self.reset();
                return Err(Error::FileNotOpenable(path, e));
            }
        };

        let header = FileHeader::empty(self.config.block_size);
        if let Err(e) = file.write_header(&header) {
            tracing::error!(path = ?path, error = %e, "Cannot write file header");
            self.reset();
            return Err(e);
        }

        self.file = Some(file);
        self.header = header;
        self.table.clear();
        self.index.clear();
        self.cursor = Cursor::Unset;
        self.state = FileState::Open;
        tracing::debug!(path = ?path, "Store file created");
        Ok(())
    }

    /// Grows the file once to the requested capacity.
    pub(super) fn prepare_for_write(&mut self) -> Result<()> {
        match self.state {
            FileState::Ready => Ok(()),
            FileState::Closed => Err(Error::NotOpen),
            FileState::Open => {
                if let Err(e) = self.adjust_file_size(self.config.effective_file_size()) {
                    tracing::error!(error = %e, "File can not be made ready for use");
                    self.close();
                    return Err(e);
                }
                self.state = FileState::Ready;
                Ok(())
            }
        }
    }

    /// Extends the file so its payload area covers `new_size` bytes. New
    /// blocks are free. In-memory changes are undone on failure.
    pub fn adjust_file_size(&mut self, new_size: u64) -> Result<()> {
        let file = self.file.as_mut().ok_or(Error::NotOpen)?;

        if new_size > self.config.max_file_size {
            return Err(Error::SizeTooLarge {
                requested: new_size,
                max: self.config.max_file_size,
            });
        }

        let current = self.header.file_size - HEADER_SIZE as u64;
        if current >= new_size {
            tracing::trace!(current = current, requested = new_size, "File already large enough");
            return Ok(());
        }

        let old = self.header;
        let stride = old.stride();
        let increment = (new_size - current).div_ceil(stride) * stride;
        let added = increment / stride;

        if old.physical_block_count + added > i32::MAX as u64 {
            return Err(Error::AdjustSizeFailed(format!(
                "{} blocks exceed the addressable block count",
                old.physical_block_count + added
            )));
        }

        tracing::debug!(from = old.file_size, to = old.file_size + increment, "Adjusting file size");
        self.header.physical_block_count += added;
        self.header.file_size += increment;

        if let Err(e) = file.extend_to(self.header.file_size) {
            tracing::error!(
                new_size = self.header.file_size,
                old_size = old.file_size,
                error = %e,
                "Extending file failed"
            );
            self.header = old;
            return Err(Error::AdjustSizeFailed(e.to_string()));
        }

        let first_new = old.physical_block_count as u32;
        for index in first_new..first_new + added as u32 {
            self.table
                .push(PhysicalBlock::free(self.header.block_offset(index)));
        }

        let persisted = self
            .table
            .write_all(file)
            .and_then(|_| file.write_header(&self.header))
            .and_then(|_| file.flush(false));

        if let Err(e) = persisted {
            tracing::error!(error = %e, "Writing file structure failed, recreating file");
            self.header = old;
            self.table.truncate(old.physical_block_count as usize);
            if let Err(recreate_err) = self.recreate() {
                tracing::error!(error = %recreate_err, "Recreating file after failed resize failed");
            }
            return Err(Error::AdjustSizeFailed(e.to_string()));
        }

        Ok(())
    }

    /// Releases the file and clears all in-memory state. Closing a closed
    /// store only logs a warning.
    pub fn close(&mut self) {
        if self.state == FileState::Closed {
            tracing::warn!("Close called on a store that is already closed");
            return;
        }
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.flush(false) {
                tracing::warn!(error = %e, "Flush on close failed");
            }
        }
        self.reset();
        tracing::info!(path = ?self.config.path, "Store closed");
    }

    pub(super) fn reset(&mut self) {
        self.file = None;
        self.header = FileHeader::default();
        self.table = BlockTable::new();
        self.index = LogicalIndex::new();
        self.cursor = Cursor::Unset;
        self.state = FileState::Closed;
        self.last_overwritten_size = 0;
    }

    /// Total size of the backing file, header included. Zero when closed.
    pub fn file_size(&self) -> u64 {
        self.header.file_size
    }

    /// Removes a store file. A missing file is not an error.
    pub fn delete_file(path: impl AsRef<Path>) -> Result<()> {
        match std::fs::remove_file(path.as_ref()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::IoError(e)),
        }
    }
}

impl Drop for FifoStore {
    fn drop(&mut self) {
        if self.state != FileState::Closed {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::block::DESCRIPTOR_SIZE;
    use crate::store::key::ItemKey;
    use crate::tmpfs::TempDir;

    const STRIDE: u64 = 64 + DESCRIPTOR_SIZE as u64;

    #[test]
    fn test_reopen_with_larger_size_grows_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.file("grow.dat");

        let mut store = FifoStore::new();
        store.open(&path, STRIDE * 10, 64).unwrap();
        store.save_item(b"before", Some(&ItemKey::new("a", 0, 1))).unwrap();
        store.close();

        store.open(&path, STRIDE * 25, 64).unwrap();
        assert_eq!(store.header.physical_block_count, 10);

        store.flush().unwrap();
        assert_eq!(store.header.physical_block_count, 25);
        assert_eq!(store.file_size(), HEADER_SIZE as u64 + 25 * STRIDE);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), store.file_size());
        assert_eq!(store.pop_next_item().unwrap().unwrap().data, b"before");
    }

    #[test]
    fn test_smaller_request_never_shrinks() {
        let dir = TempDir::new().unwrap();
        let path = dir.file("keep.dat");

        let mut store = FifoStore::new();
        store.open(&path, STRIDE * 10, 64).unwrap();
        store.flush().unwrap();
        store.close();

        store.open(&path, STRIDE * 2, 64).unwrap();
        store.flush().unwrap();
        assert_eq!(store.header.physical_block_count, 10);
    }

    #[test]
    fn test_adjust_requires_open_file() {
        let mut store = FifoStore::new();
        assert!(matches!(store.adjust_file_size(1024), Err(Error::NotOpen)));
    }

    #[test]
    fn test_unopenable_path() {
        let dir = TempDir::new().unwrap();
        let mut store = FifoStore::new();
        let result = store.open(dir.file("missing").join("store.dat"), 0, 64);
        assert!(matches!(result, Err(Error::FileNotOpenable(..))));
        assert!(!store.is_open());
    }

    #[test]
    fn test_oversized_stored_block_size_recreates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.file("huge.dat");
        std::fs::write(&path, FileHeader::empty(1 << 40).encode()).unwrap();

        let mut store = FifoStore::new();
        store.open(&path, STRIDE * 10, 64).unwrap();
        store.flush().unwrap();

        assert_eq!(store.header.block_size, 64);
        assert_eq!(store.header.physical_block_count, 10);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), HEADER_SIZE as u64 + 10 * STRIDE);
    }

    #[test]
    fn test_stored_stride_above_limit_recreates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.file("wide.dat");
        std::fs::write(&path, FileHeader::empty(1 << 20).encode()).unwrap();

        let config = StoreConfig::new(&path)
            .file_size(STRIDE * 10)
            .block_size(64)
            .max_file_size(512 * 1024);
        let mut store = FifoStore::new();
        store.open_with_config(config).unwrap();
        store.flush().unwrap();

        assert_eq!(store.header.block_size, 64);
        assert!(store.file_size() <= 512 * 1024);
    }

    #[test]
    fn test_default_size_respects_limit() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::new(dir.file("small.dat"))
            .file_size(0)
            .block_size(64)
            .max_file_size(1024 * 1024);

        let mut store = FifoStore::new();
        assert!(matches!(
            store.open_with_config(config),
            Err(Error::SizeTooLarge { .. })
        ));
        assert!(!store.is_open());
    }

    #[test]
    fn test_adjust_above_limit_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = FifoStore::new();
        store.open(dir.file("cap.dat"), STRIDE * 10, 64).unwrap();

        let max = store.config().max_file_size;
        assert!(matches!(
            store.adjust_file_size(max + 1),
            Err(Error::SizeTooLarge { .. })
        ));
        assert_eq!(store.file_size(), HEADER_SIZE as u64);
    }

    #[test]
    fn test_failed_adjust_rolls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.file("rollback.dat");
        let mut store = FifoStore::new();
        store.open(&path, STRIDE * 10, 64).unwrap();

        store.file = Some(BlockFile::open_read_only(&path).unwrap());
        let result = store.adjust_file_size(STRIDE * 10);
        assert!(matches!(result, Err(Error::AdjustSizeFailed(_))));
        assert_eq!(store.header.physical_block_count, 0);
        assert_eq!(store.file_size(), HEADER_SIZE as u64);
        assert!(store.table.is_empty());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), HEADER_SIZE as u64);
    }

    #[test]
    fn test_failed_first_write_closes_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.file("closed.dat");
        let mut store = FifoStore::new();
        store.open(&path, STRIDE * 10, 64).unwrap();

        store.file = Some(BlockFile::open_read_only(&path).unwrap());
        assert!(matches!(
            store.save_item(b"data", None),
            Err(Error::AdjustSizeFailed(_))
        ));
        assert!(!store.is_open());
        assert!(matches!(store.flush(), Err(Error::NotOpen)));

        // a later open starts from the untouched file
        store.open(&path, STRIDE * 10, 64).unwrap();
        store.save_item(b"data", None).unwrap();
        assert_eq!(store.len(), 1);
    }
}
