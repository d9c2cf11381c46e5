//! In-memory mirror of the on-disk block descriptors.
//!
//! The table is the arena the chains live in: links are indices into it. It
//! finds free blocks, repairs chains left inconsistent by a crash, rebuilds
//! the logical index on open and persists chains block by block.
//!
//! # Repair
//!
//! Repair runs once after the descriptors are loaded:
//!
//! 1. [`BlockTable::check_blocks`] frees every in-use block whose `next` or
//!    `previous` link does not point at an in-use block linking back. The pass
//!    repeats until stable so that freeing one block also frees the blocks
//!    that relied on it.
//! 2. [`BlockTable::build_index`] walks every chain from its head, bounded by
//!    the table length. A chain that runs over the bound or into a free block
//!    is reclaimed whole. In-use blocks no chain reaches are reclaimed last.

use super::block::{BlockLink, PhysicalBlock};
use super::file::BlockFile;
use super::header::FileHeader;
use super::index::{LogicalBlock, LogicalIndex};
use crate::error::Result;
use crate::Error;

#[derive(Debug, Default)]
pub struct BlockTable {
    blocks: Vec<PhysicalBlock>,
}

impl BlockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every descriptor the header announces. Descriptors that fail to
    /// decode or sit at the wrong offset are loaded as free blocks; the second
    /// value counts them.
    pub fn load(file: &mut BlockFile, header: &FileHeader) -> Result<(Self, usize)> {
        let count = header.physical_block_count as u32;
        let mut blocks = Vec::with_capacity(count as usize);
        let mut sanitized = 0;

        for index in 0..count {
            let offset = header.block_offset(index);
            let raw = file.read_descriptor(offset)?;
            let block = match PhysicalBlock::decode(&raw) {
                Ok(block) if block.file_offset == offset => block,
                Ok(block) => {
                    tracing::warn!(
                        block = index,
                        stored_offset = block.file_offset,
                        expected_offset = offset,
                        "Descriptor offset mismatch, reclaiming block"
                    );
                    sanitized += 1;
                    PhysicalBlock::free(offset)
                }
                Err(e) => {
                    tracing::warn!(block = index, error = %e, "Unreadable descriptor, reclaiming block");
                    sanitized += 1;
                    PhysicalBlock::free(offset)
                }
            };
            blocks.push(block);
        }

        Ok((Self { blocks }, sanitized))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&PhysicalBlock> {
        self.blocks.get(index as usize)
    }

    pub(crate) fn get_mut(&mut self, index: u32) -> Option<&mut PhysicalBlock> {
        self.blocks.get_mut(index as usize)
    }

    pub fn push(&mut self, block: PhysicalBlock) {
        self.blocks.push(block);
    }

    pub fn truncate(&mut self, len: usize) {
        self.blocks.truncate(len);
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }

    pub fn in_use_count(&self) -> usize {
        self.blocks.iter().filter(|b| b.is_in_use()).count()
    }

    /// First free block, scanning from the start of the table.
    pub fn find_free_block(&self) -> Option<u32> {
        self.blocks
            .iter()
            .position(|b| !b.is_in_use())
            .map(|i| i as u32)
    }

    /// Marks the given blocks free in memory only.
    pub fn release(&mut self, indices: &[u32]) {
        for &index in indices {
            if let Some(block) = self.blocks.get_mut(index as usize) {
                block.size_in_bytes = 0;
            }
        }
    }

    /// First repair pass. Returns the number of blocks freed.
    pub fn check_blocks(&mut self) -> usize {
        let mut reclaimed = 0;
        loop {
            let mut changed = false;
            for i in 0..self.blocks.len() {
                if !self.blocks[i].is_in_use() {
                    continue;
                }
                if !self.next_link_valid(i) || !self.previous_link_valid(i) {
                    tracing::debug!(block = i, "Broken chain link, reclaiming block");
                    self.blocks[i].size_in_bytes = 0;
                    reclaimed += 1;
                    changed = true;
                }
            }
            if !changed {
                return reclaimed;
            }
        }
    }

    fn next_link_valid(&self, i: usize) -> bool {
        match self.blocks[i].next {
            BlockLink::End => true,
            BlockLink::Begin => false,
            BlockLink::Index(n) => self
                .blocks
                .get(n as usize)
                .is_some_and(|next| next.is_in_use() && next.previous == BlockLink::Index(i as u32)),
        }
    }

    fn previous_link_valid(&self, i: usize) -> bool {
        match self.blocks[i].previous {
            BlockLink::Begin => true,
            BlockLink::End => false,
            BlockLink::Index(p) => self
                .blocks
                .get(p as usize)
                .is_some_and(|prev| prev.is_in_use() && prev.next == BlockLink::Index(i as u32)),
        }
    }

    /// Second repair pass: rebuilds the logical index from chain heads.
    /// Returns the index and the number of blocks freed.
    pub fn build_index(&mut self) -> (LogicalIndex, usize) {
        let limit = self.blocks.len();
        let heads: Vec<u32> = self
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.is_in_use() && b.previous == BlockLink::Begin)
            .map(|(i, _)| i as u32)
            .collect();

        let mut index = LogicalIndex::new();
        let mut reachable = vec![false; limit];
        let mut reclaimed = 0;

        for head in heads {
            match self.walk_chain(head, limit) {
                Some((chain, size_in_bytes)) => {
                    for &i in &chain {
                        reachable[i as usize] = true;
                    }
                    index.insert(LogicalBlock {
                        size_in_bytes,
                        first_block: head,
                        block_count: chain.len() as u32,
                        key: self.blocks[head as usize].key.clone(),
                    });
                }
                None => {
                    let freed = self.reclaim_chain(head);
                    tracing::warn!(head = head, blocks = freed, "Loop or broken chain detected, reclaiming");
                    reclaimed += freed;
                }
            }
        }

        for (i, block) in self.blocks.iter_mut().enumerate() {
            if block.is_in_use() && !reachable[i] {
                block.size_in_bytes = 0;
                reclaimed += 1;
            }
        }

        (index, reclaimed)
    }

    /// Follows `next` links from `head`. `None` if the walk exceeds `limit`
    /// steps or meets a free or missing block.
    fn walk_chain(&self, head: u32, limit: usize) -> Option<(Vec<u32>, u64)> {
        let mut chain = Vec::new();
        let mut size = 0u64;
        let mut current = head;
        loop {
            let block = self.blocks.get(current as usize)?;
            if !block.is_in_use() {
                return None;
            }
            chain.push(current);
            size += block.size_in_bytes as u64;
            if chain.len() > limit {
                return None;
            }
            match block.next {
                BlockLink::End => return Some((chain, size)),
                BlockLink::Index(n) => current = n,
                BlockLink::Begin => return None,
            }
        }
    }

    /// Frees blocks from `head` until a free block or the chain end. Freed
    /// blocks stop the walk, so a cycle terminates.
    fn reclaim_chain(&mut self, head: u32) -> usize {
        let mut freed = 0;
        let mut current = Some(head);
        while let Some(i) = current {
            let Some(block) = self.blocks.get_mut(i as usize) else {
                break;
            };
            if !block.is_in_use() {
                break;
            }
            block.size_in_bytes = 0;
            freed += 1;
            current = match block.next {
                BlockLink::Index(n) => Some(n),
                _ => None,
            };
        }
        freed
    }

    /// Block ids of a logical block in chain order.
    pub fn chain_of(&self, logical: &LogicalBlock) -> Result<Vec<u32>> {
        let expected = logical.block_count as usize;
        let mut chain = Vec::with_capacity(expected);
        let mut current = BlockLink::Index(logical.first_block);

        while let BlockLink::Index(i) = current {
            if chain.len() >= expected {
                return Err(Error::CorruptedChain(format!(
                    "chain at block {} is longer than {} blocks",
                    logical.first_block, expected
                )));
            }
            let block = self.get(i).ok_or_else(|| {
                Error::CorruptedChain(format!("block {} is outside the table", i))
            })?;
            chain.push(i);
            current = block.next;
        }

        if current != BlockLink::End || chain.len() != expected {
            return Err(Error::CorruptedChain(format!(
                "chain at block {} has {} blocks, expected {}",
                logical.first_block,
                chain.len(),
                expected
            )));
        }
        Ok(chain)
    }

    /// Writes every block of the chain with its slice of `payload`, or frees
    /// the chain on disk when `payload` is `None`. A freed chain is only marked
    /// free in memory once all its descriptors are written.
    pub fn update_chain(
        &mut self,
        file: &mut BlockFile,
        logical: &LogicalBlock,
        payload: Option<&[u8]>,
    ) -> Result<()> {
        let chain = self.chain_of(logical)?;

        match payload {
            None => {
                for &i in &chain {
                    let mut freed = self.blocks[i as usize].clone();
                    freed.size_in_bytes = 0;
                    file.write_descriptor(&freed)?;
                }
                self.release(&chain);
            }
            Some(data) => {
                let mut written = 0usize;
                for &i in &chain {
                    let block = &self.blocks[i as usize];
                    let len = block.size_in_bytes as usize;
                    let slice = data.get(written..written + len).ok_or_else(|| {
                        Error::CorruptedChain(format!(
                            "payload of {} bytes is shorter than chain at block {}",
                            data.len(),
                            logical.first_block
                        ))
                    })?;
                    file.write_block(block, slice)?;
                    written += len;
                }
                if written != data.len() {
                    return Err(Error::CorruptedChain(format!(
                        "wrote {} of {} payload bytes",
                        written,
                        data.len()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Reads up to `limit` payload bytes of a logical block.
    pub fn read_chain(
        &self,
        file: &mut BlockFile,
        logical: &LogicalBlock,
        limit: usize,
    ) -> Result<Vec<u8>> {
        let chain = self.chain_of(logical)?;
        let mut data = Vec::with_capacity(limit.min(logical.size_in_bytes as usize));

        for i in chain {
            let remaining = limit - data.len();
            if remaining == 0 {
                break;
            }
            let block = &self.blocks[i as usize];
            let len = (block.size_in_bytes as usize).min(remaining);
            file.read_payload(block, len, &mut data)?;
        }
        Ok(data)
    }

    /// Writes the whole descriptor table.
    pub fn write_all(&self, file: &mut BlockFile) -> Result<()> {
        for block in &self.blocks {
            file.write_descriptor(block)?;
        }
        Ok(())
    }
}
