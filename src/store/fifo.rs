//! The FIFO item store.
//!
//! Items are saved as chains of physical blocks and indexed oldest first.
//! When no free block is left the oldest item is evicted, one item at a time,
//! until the new item fits. Items leave the store either by popping the
//! oldest one or by walking the index with a cursor and removing as it goes.

use super::block::BlockLink;
use super::file::BlockFile;
use super::header::FileHeader;
use super::index::{LogicalBlock, LogicalIndex};
use super::key::{now_millis, IndexKey, ItemKey};
use super::table::BlockTable;
use crate::config::StoreConfig;
use crate::encoding;
use crate::error::Result;
use crate::Error;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum FileState {
    #[default]
    Closed,
    /// File is open and loaded but has not been grown yet.
    Open,
    /// File has been grown to its requested capacity.
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) enum Cursor {
    #[default]
    Unset,
    At(IndexKey),
    Exhausted,
}

/// An item returned by [`FifoStore::pop_next_item`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredItem {
    pub data: Vec<u8>,
    pub key: ItemKey,
}

/// The item under the cursor. Carries no payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundItem {
    pub size: u64,
    pub key: ItemKey,
    position: IndexKey,
}

/// Outcome of [`FifoStore::remove_item_and_move_next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedItem {
    /// Payload of the removed item, when it was asked for.
    pub data: Option<Vec<u8>>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileStats {
    /// Payload bytes of all stored items.
    pub contents_size: u64,
    /// Payload bytes evicted since the last call to `file_stats`.
    pub last_overwritten_size: u64,
}

/// A bounded FIFO of byte items backed by a single file.
#[derive(Debug, Default)]
pub struct FifoStore {
    pub(super) config: StoreConfig,
    pub(super) file: Option<BlockFile>,
    pub(super) state: FileState,
    pub(super) header: FileHeader,
    pub(super) table: BlockTable,
    pub(super) index: LogicalIndex,
    pub(super) cursor: Cursor,
    pub(super) last_overwritten_size: u64,
}

impl FifoStore {
    /// A closed store. Call [`FifoStore::open`] before use.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.state != FileState::Closed
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Saves `data` as the newest item. A missing key, or a key with time
    /// zero, is stamped with the current time. The oldest items are evicted
    /// when the file is full.
    pub fn save_item(&mut self, data: &[u8], key: Option<&ItemKey>) -> Result<()> {
        if self.state == FileState::Closed {
            return Err(Error::NotOpen);
        }
        self.prepare_for_write()?;

        if data.is_empty() {
            tracing::trace!("Ignoring empty item");
            return Ok(());
        }
        let capacity = self.header.capacity();
        if data.len() as u64 >= capacity {
            tracing::error!(size = data.len(), capacity = capacity, "Item does not fit the file");
            return Err(Error::ItemTooLarge {
                size: data.len(),
                capacity,
            });
        }

        let key = match key {
            Some(key) if key.time != 0 => ItemKey::new(key.id.as_str(), key.priority, key.time),
            Some(key) => ItemKey::new(key.id.as_str(), key.priority, now_millis()),
            None => ItemKey::now(),
        };

        let overwritten_before = self.last_overwritten_size;
        let mut chain = Vec::new();
        let logical = match self.write_chain(data, &key, &mut chain) {
            Ok(logical) => logical,
            Err(e) => {
                tracing::error!(size = data.len(), error = %e, "Saving item failed");
                self.table.release(&chain);
                return Err(e);
            }
        };

        let evicted = self.last_overwritten_size - overwritten_before;
        if evicted > 0 {
            tracing::warn!(bytes = evicted, "Evicted oldest items to make room");
        }
        tracing::trace!(
            id = %logical.key.id,
            size = logical.size_in_bytes,
            blocks = logical.block_count,
            "Item saved"
        );
        self.index.insert(logical);
        Ok(())
    }

    /// Allocates and links one block per `block_size` slice of `data`, then
    /// persists the chain. Allocated ids are pushed to `chain` as they are
    /// taken so the caller can release them on failure.
    fn write_chain(
        &mut self,
        data: &[u8],
        key: &ItemKey,
        chain: &mut Vec<u32>,
    ) -> Result<LogicalBlock> {
        let block_size = self.header.block_size as usize;

        for piece in data.chunks(block_size) {
            let id = self.take_free_block()?;
            let previous = chain.last().copied();

            if let Some(block) = self.table.get_mut(id) {
                block.size_in_bytes = piece.len() as u32;
                block.next = BlockLink::End;
                block.previous = previous.map_or(BlockLink::Begin, BlockLink::Index);
                block.key = key.clone();
            }
            if let Some(prev) = previous.and_then(|p| self.table.get_mut(p)) {
                prev.next = BlockLink::Index(id);
            }
            chain.push(id);
        }

        let logical = LogicalBlock {
            size_in_bytes: data.len() as u64,
            first_block: chain[0],
            block_count: chain.len() as u32,
            key: key.clone(),
        };
        let file = self.file.as_mut().ok_or(Error::NotOpen)?;
        self.table.update_chain(file, &logical, Some(data))?;
        Ok(logical)
    }

    fn take_free_block(&mut self) -> Result<u32> {
        loop {
            if let Some(id) = self.table.find_free_block() {
                return Ok(id);
            }
            if !self.evict_oldest()? {
                return Err(Error::CorruptedChain(
                    "no free block and no item left to evict".into(),
                ));
            }
        }
    }

    /// Frees the chain of the oldest item. Returns false when there is none.
    fn evict_oldest(&mut self) -> Result<bool> {
        let Some((position, logical)) = self
            .index
            .oldest()
            .map(|(k, l)| (k.clone(), l.clone()))
        else {
            return Ok(false);
        };

        let file = self.file.as_mut().ok_or(Error::NotOpen)?;
        self.table.update_chain(file, &logical, None)?;
        self.index.remove(&position);
        self.last_overwritten_size += logical.size_in_bytes;

        tracing::debug!(
            id = %logical.key.id,
            time = logical.key.time,
            size = logical.size_in_bytes,
            "Evicted oldest item"
        );
        Ok(true)
    }

    /// Removes and returns the oldest item.
    pub fn pop_next_item(&mut self) -> Result<Option<StoredItem>> {
        let file = self.file.as_mut().ok_or(Error::NotOpen)?;
        let Some((position, logical)) = self
            .index
            .oldest()
            .map(|(k, l)| (k.clone(), l.clone()))
        else {
            return Ok(None);
        };

        let data = self
            .table
            .read_chain(file, &logical, logical.size_in_bytes as usize)?;
        self.table.update_chain(file, &logical, None)?;
        self.index.remove(&position);

        tracing::trace!(id = %logical.key.id, size = data.len(), "Item popped");
        Ok(Some(StoredItem {
            data,
            key: logical.key,
        }))
    }

    /// Moves the cursor to the oldest item.
    pub fn find_first_item(&mut self) -> Result<Option<FoundItem>> {
        if self.state == FileState::Closed {
            return Err(Error::NotOpen);
        }
        let first = self.index.first_key();
        Ok(self.move_cursor(first))
    }

    /// Moves the cursor to the item after it. Starts at the oldest item when
    /// the cursor was never placed.
    pub fn find_next_item(&mut self) -> Result<Option<FoundItem>> {
        if self.state == FileState::Closed {
            return Err(Error::NotOpen);
        }
        let next = match &self.cursor {
            Cursor::Unset => self.index.first_key(),
            Cursor::At(position) => self.index.next_key_after(position),
            Cursor::Exhausted => return Ok(None),
        };
        Ok(self.move_cursor(next))
    }

    fn move_cursor(&mut self, position: Option<IndexKey>) -> Option<FoundItem> {
        let found = position
            .as_ref()
            .and_then(|p| self.index.get(p))
            .map(|logical| FoundItem {
                size: logical.size_in_bytes,
                key: logical.key.clone(),
                position: logical.index_key(),
            });
        self.cursor = match position {
            Some(position) => Cursor::At(position),
            None => Cursor::Exhausted,
        };
        found
    }

    /// Position of `item` if it is the item under the cursor.
    fn cursor_position(&self, item: &FoundItem) -> Result<IndexKey> {
        let position = match &self.cursor {
            Cursor::At(position) => position,
            Cursor::Unset | Cursor::Exhausted => return Err(Error::NoMoreItems),
        };
        if item.position != *position {
            return Err(Error::InvalidArgument(
                "item is not the one under the cursor".into(),
            ));
        }
        Ok(position.clone())
    }

    /// Reads up to `read_size` bytes of the item under the cursor without
    /// removing it.
    pub fn read_item(&mut self, item: &FoundItem, read_size: usize) -> Result<Vec<u8>> {
        if self.state == FileState::Closed {
            return Err(Error::NotOpen);
        }
        if read_size == 0 {
            return Err(Error::InvalidArgument("read size must not be zero".into()));
        }
        let position = self.cursor_position(item)?;
        let logical = self.index.get(&position).ok_or(Error::StaleCursor)?;
        let file = self.file.as_mut().ok_or(Error::NotOpen)?;
        self.table.read_chain(file, logical, read_size)
    }

    /// Removes the item under the cursor, optionally returning its payload,
    /// and advances the cursor. When more items follow, `item` is updated to
    /// describe the next one.
    pub fn remove_item_and_move_next(
        &mut self,
        item: &mut FoundItem,
        read_data: bool,
    ) -> Result<RemovedItem> {
        if self.state == FileState::Closed {
            return Err(Error::NotOpen);
        }
        let position = self.cursor_position(item)?;
        let logical = self
            .index
            .get(&position)
            .cloned()
            .ok_or(Error::StaleCursor)?;

        let file = self.file.as_mut().ok_or(Error::NotOpen)?;
        let data = if read_data {
            Some(
                self.table
                    .read_chain(file, &logical, logical.size_in_bytes as usize)?,
            )
        } else {
            None
        };
        self.table.update_chain(file, &logical, None)?;

        let next = self.index.next_key_after(&position);
        self.index.remove(&position);
        tracing::trace!(id = %logical.key.id, size = logical.size_in_bytes, "Item removed");

        let has_more = match self.move_cursor(next) {
            Some(found) => {
                *item = found;
                true
            }
            None => false,
        };
        Ok(RemovedItem { data, has_more })
    }

    /// Flushes buffered writes, syncing to disk when configured to.
    pub fn flush(&mut self) -> Result<()> {
        if self.state == FileState::Closed {
            return Err(Error::NotOpen);
        }
        self.prepare_for_write()?;
        let sync = self.config.sync_on_flush;
        self.file.as_mut().ok_or(Error::NotOpen)?.flush(sync)
    }

    /// Current contents size and the bytes evicted since the previous call.
    pub fn file_stats(&mut self) -> FileStats {
        FileStats {
            contents_size: self.index.contents_size(),
            last_overwritten_size: std::mem::take(&mut self.last_overwritten_size),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Size of the oldest item, zero when empty.
    pub fn buffer_size(&self) -> u64 {
        self.index
            .oldest()
            .map_or(0, |(_, logical)| logical.size_in_bytes)
    }

    /// Serializes `value` with bincode and saves it as an item.
    pub fn save_value<T: Serialize>(&mut self, value: &T, key: Option<&ItemKey>) -> Result<()> {
        let bytes = encoding::serialize(value)?;
        self.save_item(&bytes, key)
    }

    /// Pops the oldest item and deserializes it. The item is gone even when
    /// it fails to deserialize.
    pub fn pop_value<T: DeserializeOwned>(&mut self) -> Result<Option<(T, ItemKey)>> {
        match self.pop_next_item()? {
            Some(item) => Ok(Some((encoding::deserialize(&item.data)?, item.key))),
            None => Ok(None),
        }
    }

    #[cfg(test)]
    pub(crate) fn physical_block(&self, index: u32) -> Option<&super::block::PhysicalBlock> {
        self.table.get(index)
    }
}
