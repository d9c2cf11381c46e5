use super::key::{IndexKey, ItemKey};
use std::collections::BTreeMap;
use std::ops::Bound;

/// One stored item: a chain of physical blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalBlock {
    /// Payload bytes across the whole chain.
    pub size_in_bytes: u64,
    pub first_block: u32,
    pub block_count: u32,
    pub key: ItemKey,
}

impl LogicalBlock {
    pub fn index_key(&self) -> IndexKey {
        IndexKey::new(self.key.clone(), self.first_block)
    }
}

/// Logical blocks ordered oldest first.
#[derive(Debug, Default)]
pub struct LogicalIndex {
    blocks: BTreeMap<IndexKey, LogicalBlock>,
}

impl LogicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, block: LogicalBlock) {
        self.blocks.insert(block.index_key(), block);
    }

    pub fn remove(&mut self, key: &IndexKey) -> Option<LogicalBlock> {
        self.blocks.remove(key)
    }

    pub fn get(&self, key: &IndexKey) -> Option<&LogicalBlock> {
        self.blocks.get(key)
    }

    pub fn oldest(&self) -> Option<(&IndexKey, &LogicalBlock)> {
        self.blocks.iter().next()
    }

    pub fn first_key(&self) -> Option<IndexKey> {
        self.blocks.keys().next().cloned()
    }

    /// The first key ordered strictly after `key`, whether or not `key` is
    /// still present.
    pub fn next_key_after(&self, key: &IndexKey) -> Option<IndexKey> {
        self.blocks
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(k, _)| k.clone())
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Payload bytes held by all items.
    pub fn contents_size(&self) -> u64 {
        self.blocks.values().map(|b| b.size_in_bytes).sum()
    }

    /// Physical blocks referenced by all items.
    pub fn block_count(&self) -> u64 {
        self.blocks.values().map(|b| b.block_count as u64).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IndexKey, &LogicalBlock)> {
        self.blocks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logical(time: u64, first_block: u32, size: u64) -> LogicalBlock {
        LogicalBlock {
            size_in_bytes: size,
            first_block,
            block_count: 1,
            key: ItemKey::new("", 0, time),
        }
    }

    #[test]
    fn test_oldest_first() {
        let mut index = LogicalIndex::new();
        index.insert(logical(300, 0, 10));
        index.insert(logical(100, 1, 20));
        index.insert(logical(200, 2, 30));

        let (_, oldest) = index.oldest().unwrap();
        assert_eq!(oldest.key.time, 100);
        assert_eq!(index.contents_size(), 60);
        assert_eq!(index.block_count(), 3);

        let times: Vec<u64> = index.iter().map(|(_, b)| b.key.time).collect();
        assert_eq!(times, vec![100, 200, 300]);
    }

    #[test]
    fn test_equal_keys_kept_apart_by_block() {
        let mut index = LogicalIndex::new();
        index.insert(logical(100, 4, 1));
        index.insert(logical(100, 2, 1));
        assert_eq!(index.len(), 2);
        assert_eq!(index.oldest().unwrap().1.first_block, 2);
    }

    #[test]
    fn test_next_key_after_removed_key() {
        let mut index = LogicalIndex::new();
        for (i, time) in [10u64, 20, 30].iter().enumerate() {
            index.insert(logical(*time, i as u32, 1));
        }
        let middle = index.next_key_after(&index.first_key().unwrap()).unwrap();
        assert_eq!(middle.item.time, 20);

        index.remove(&middle);
        let next = index.next_key_after(&middle).unwrap();
        assert_eq!(next.item.time, 30);
        assert!(index.next_key_after(&next).is_none());
    }

    #[test]
    fn test_clear() {
        let mut index = LogicalIndex::new();
        index.insert(logical(1, 0, 5));
        index.clear();
        assert!(index.is_empty());
        assert!(index.oldest().is_none());
        assert_eq!(index.contents_size(), 0);
    }
}
