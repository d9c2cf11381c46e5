//! Physical block descriptors.
//!
//! Every block slot starts with a fixed-size descriptor followed by
//! `block_size` payload bytes:
//!
//! ```text
//! +----------+---------+---------+---------+-------------+---------+-------------+---------+
//! | crc32:u32|size:u32 |next:i32 |prev:i32 |file_off:u64 |id:[128] |priority:u32 |time:u64 |
//! +----------+---------+---------+---------+-------------+---------+-------------+---------+
//! ```
//!
//! Integers use native byte order. The CRC covers every byte after itself.

use super::key::{ItemKey, ID_CAPACITY};
use crate::error::Result;
use crate::hasher;
use crate::Error;
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

pub const DESCRIPTOR_SIZE: usize = 4 + 4 + 4 + 4 + 8 + ID_CAPACITY + 4 + 8;

const RAW_END: i32 = -3;
const RAW_BEGIN: i32 = -2;

/// Link from a physical block to its neighbour in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLink {
    /// No previous block: this block heads its chain.
    Begin,
    /// No next block: this block ends its chain.
    End,
    Index(u32),
}

impl BlockLink {
    pub fn to_raw(self) -> i32 {
        match self {
            BlockLink::Begin => RAW_BEGIN,
            BlockLink::End => RAW_END,
            BlockLink::Index(i) => i as i32,
        }
    }

    /// `None` for values that are neither a sentinel nor an index, including
    /// the legacy "middle" sentinel `-1`.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            RAW_END => Some(BlockLink::End),
            RAW_BEGIN => Some(BlockLink::Begin),
            i if i >= 0 => Some(BlockLink::Index(i as u32)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalBlock {
    /// Payload bytes used in this block. Zero marks the block free.
    pub size_in_bytes: u32,
    pub next: BlockLink,
    pub previous: BlockLink,
    /// Absolute offset of the descriptor; the payload follows it.
    pub file_offset: u64,
    /// Key of the owning item, repeated in every block of the chain.
    pub key: ItemKey,
}

impl PhysicalBlock {
    pub fn free(file_offset: u64) -> Self {
        Self {
            size_in_bytes: 0,
            next: BlockLink::End,
            previous: BlockLink::Begin,
            file_offset,
            key: ItemKey::default(),
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.size_in_bytes != 0
    }

    pub fn payload_offset(&self) -> u64 {
        self.file_offset + DESCRIPTOR_SIZE as u64
    }

    pub fn encode(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut buf = [0u8; DESCRIPTOR_SIZE];
        self.encode_body(&mut &mut buf[4..])
            .expect("descriptor body should fit its buffer");
        let checksum = hasher::checksum(&buf[4..]);
        buf[..4].copy_from_slice(&checksum.to_ne_bytes());
        buf
    }

    fn encode_body<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer
            .write_u32::<NativeEndian>(self.size_in_bytes)
            .map_err(|e| Error::Encode("size_in_bytes", e))?;
        writer
            .write_i32::<NativeEndian>(self.next.to_raw())
            .map_err(|e| Error::Encode("next_block", e))?;
        writer
            .write_i32::<NativeEndian>(self.previous.to_raw())
            .map_err(|e| Error::Encode("previous_block", e))?;
        writer
            .write_u64::<NativeEndian>(self.file_offset)
            .map_err(|e| Error::Encode("file_offset", e))?;
        writer
            .write_all(&self.key.encode_id())
            .map_err(|e| Error::Encode("key.id", e))?;
        writer
            .write_u32::<NativeEndian>(self.key.priority)
            .map_err(|e| Error::Encode("key.priority", e))?;
        writer
            .write_u64::<NativeEndian>(self.key.time)
            .map_err(|e| Error::Encode("key.time", e))?;
        Ok(())
    }

    /// Decodes a descriptor. A checksum mismatch or an unknown link value is
    /// reported as `CorruptedChain`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DESCRIPTOR_SIZE {
            return Err(Error::Decode(
                "descriptor",
                std::io::ErrorKind::UnexpectedEof.into(),
            ));
        }
        let bytes = &bytes[..DESCRIPTOR_SIZE];
        let mut reader = bytes;

        let checksum = reader
            .read_u32::<NativeEndian>()
            .map_err(|e| Error::Decode("checksum", e))?;
        if checksum != hasher::checksum(&bytes[4..]) {
            return Err(Error::CorruptedChain("descriptor checksum mismatch".into()));
        }

        let size_in_bytes = reader
            .read_u32::<NativeEndian>()
            .map_err(|e| Error::Decode("size_in_bytes", e))?;
        let raw_next = reader
            .read_i32::<NativeEndian>()
            .map_err(|e| Error::Decode("next_block", e))?;
        let raw_previous = reader
            .read_i32::<NativeEndian>()
            .map_err(|e| Error::Decode("previous_block", e))?;
        let file_offset = reader
            .read_u64::<NativeEndian>()
            .map_err(|e| Error::Decode("file_offset", e))?;

        let mut id = [0u8; ID_CAPACITY];
        reader
            .read_exact(&mut id)
            .map_err(|e| Error::Decode("key.id", e))?;
        let priority = reader
            .read_u32::<NativeEndian>()
            .map_err(|e| Error::Decode("key.priority", e))?;
        let time = reader
            .read_u64::<NativeEndian>()
            .map_err(|e| Error::Decode("key.time", e))?;

        let next = BlockLink::from_raw(raw_next)
            .ok_or_else(|| Error::CorruptedChain(format!("invalid next link {}", raw_next)))?;
        let previous = BlockLink::from_raw(raw_previous).ok_or_else(|| {
            Error::CorruptedChain(format!("invalid previous link {}", raw_previous))
        })?;

        Ok(Self {
            size_in_bytes,
            next,
            previous,
            file_offset,
            key: ItemKey {
                id: ItemKey::decode_id(&id),
                priority,
                time,
            },
        })
    }
}
