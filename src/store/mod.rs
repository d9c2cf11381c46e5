//! Fixed-block FIFO storage.
//!
//! The backing file is a header followed by a fixed number of block slots:
//!
//! ```text
//! +--------------+------------------------------------+-----+----------------------------------------+
//! | FileHeader   | Descriptor 0 | payload 0           | ... | Descriptor N-1 | payload N-1           |
//! | (32 bytes)   | (164 bytes)  | (block_size bytes)  |     |                |                       |
//! +--------------+------------------------------------+-----+----------------------------------------+
//! ```
//!
//! An item spans one or more blocks linked into a chain through the
//! descriptors. The chains are the only persistent structure: the ordered
//! index of items is rebuilt from them every time the file is opened.

pub mod block;
pub mod fifo;
pub mod file;
pub mod header;
pub mod index;
pub mod key;
mod layout;
pub mod table;

pub use fifo::{FifoStore, FileStats, FoundItem, RemovedItem, StoredItem};
pub use key::ItemKey;

use crate::error::Result;

/// The queue interface upload pipelines program against.
pub trait OfflineStorage: Send {
    /// Saves an item, evicting the oldest items when out of space.
    fn save_item(&mut self, data: &[u8], key: Option<&ItemKey>) -> Result<()>;

    /// Removes and returns the oldest item.
    fn pop_next_item(&mut self) -> Result<Option<StoredItem>>;

    fn find_first_item(&mut self) -> Result<Option<FoundItem>>;

    fn find_next_item(&mut self) -> Result<Option<FoundItem>>;

    /// Reads the item under the cursor without removing it.
    fn read_item(&mut self, item: &FoundItem, read_size: usize) -> Result<Vec<u8>>;

    /// Removes the item under the cursor and advances to the next one.
    fn remove_item_and_move_next(
        &mut self,
        item: &mut FoundItem,
        read_data: bool,
    ) -> Result<RemovedItem>;

    fn flush(&mut self) -> Result<()>;

    fn file_stats(&mut self) -> FileStats;

    fn is_empty(&self) -> bool;

    /// Removes every item, handing each payload to `f` oldest first. Stops at
    /// the first error `f` returns; the failed item stays stored.
    fn drain<F>(&mut self, mut f: F) -> Result<usize>
    where
        F: FnMut(&ItemKey, &[u8]) -> Result<()>,
        Self: Sized,
    {
        let Some(mut item) = self.find_first_item()? else {
            return Ok(0);
        };
        let mut drained = 0;
        loop {
            let data = self.read_item(&item, item.size.max(1) as usize)?;
            f(&item.key, &data)?;
            let removed = self.remove_item_and_move_next(&mut item, false)?;
            drained += 1;
            if !removed.has_more {
                return Ok(drained);
            }
        }
    }
}

impl OfflineStorage for FifoStore {
    fn save_item(&mut self, data: &[u8], key: Option<&ItemKey>) -> Result<()> {
        FifoStore::save_item(self, data, key)
    }

    fn pop_next_item(&mut self) -> Result<Option<StoredItem>> {
        FifoStore::pop_next_item(self)
    }

    fn find_first_item(&mut self) -> Result<Option<FoundItem>> {
        FifoStore::find_first_item(self)
    }

    fn find_next_item(&mut self) -> Result<Option<FoundItem>> {
        FifoStore::find_next_item(self)
    }

    fn read_item(&mut self, item: &FoundItem, read_size: usize) -> Result<Vec<u8>> {
        FifoStore::read_item(self, item, read_size)
    }

    fn remove_item_and_move_next(
        &mut self,
        item: &mut FoundItem,
        read_data: bool,
    ) -> Result<RemovedItem> {
        FifoStore::remove_item_and_move_next(self, item, read_data)
    }

    fn flush(&mut self) -> Result<()> {
        FifoStore::flush(self)
    }

    fn file_stats(&mut self) -> FileStats {
        FifoStore::file_stats(self)
    }

    fn is_empty(&self) -> bool {
        FifoStore::is_empty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmpfs::TempDir;
    use crate::Error;

    fn open(dir: &TempDir) -> FifoStore {
        let mut store = FifoStore::new();
        store.open(dir.file("queue.dat"), 64 * 1024, 1024).unwrap();
        store
    }

    fn upload_all<S: OfflineStorage>(storage: &mut S, sent: &mut Vec<Vec<u8>>) -> Result<usize> {
        storage.drain(|_, data| {
            sent.push(data.to_vec());
            Ok(())
        })
    }

    #[test]
    fn test_drain_through_trait() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        for i in 0..5u64 {
            let data = vec![i as u8; 1500];
            OfflineStorage::save_item(&mut store, &data, Some(&ItemKey::new("u", 0, i + 1))).unwrap();
        }

        let mut sent = Vec::new();
        assert_eq!(upload_all(&mut store, &mut sent).unwrap(), 5);
        assert_eq!(sent.len(), 5);
        assert!(sent.iter().enumerate().all(|(i, d)| d == &vec![i as u8; 1500]));
        assert!(OfflineStorage::is_empty(&store));
        assert_eq!(upload_all(&mut store, &mut sent).unwrap(), 0);
    }

    #[test]
    fn test_drain_stops_on_failure() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        for i in 0..3u64 {
            store.save_item(b"payload", Some(&ItemKey::new("u", 0, i + 1))).unwrap();
        }

        let mut calls = 0;
        let result = store.drain(|key, _| {
            calls += 1;
            if key.time == 2 {
                return Err(Error::InvalidArgument("endpoint rejected item".into()));
            }
            Ok(())
        });

        assert!(result.is_err());
        assert_eq!(calls, 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.buffer_size(), 7);
    }
}
