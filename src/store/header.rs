use super::block::DESCRIPTOR_SIZE;
use crate::error::Result;
use crate::Error;
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

// magic_number, file_size, block_size, physical_block_count
pub const HEADER_SIZE: usize = 32;

/// "stofile", 56 bits.
pub const MAGIC: u64 = 0x656c_6966_6f74_73;
pub const FORMAT_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileHeader {
    pub magic_number: u64,
    pub file_size: u64,
    pub block_size: u64,
    pub physical_block_count: u64,
}

impl FileHeader {
    /// Header of a file holding no blocks yet.
    pub fn empty(block_size: u64) -> Self {
        FileHeader {
            magic_number: (MAGIC << 4) | (FORMAT_VERSION & 0x0F) as u64,
            file_size: HEADER_SIZE as u64,
            block_size,
            physical_block_count: 0,
        }
    }

    /// Bytes occupied by one block slot, descriptor included.
    pub fn stride(&self) -> u64 {
        self.block_size + DESCRIPTOR_SIZE as u64
    }

    /// Payload bytes the file can hold.
    pub fn capacity(&self) -> u64 {
        self.physical_block_count * self.block_size
    }

    /// Offset of the descriptor of block `index`.
    pub fn block_offset(&self, index: u32) -> u64 {
        HEADER_SIZE as u64 + index as u64 * self.stride()
    }

    pub fn version(&self) -> u8 {
        (self.magic_number & 0x0F) as u8
    }

    /// Checks the header against itself and against the real file length.
    pub fn validate(&self, actual_len: u64) -> Result<()> {
        if self.magic_number >> 4 != MAGIC {
            return Err(Error::InvalidMagic(self.magic_number >> 4));
        }
        if self.version() != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(self.version()));
        }
        if self.file_size != actual_len {
            return Err(Error::FileSizeMismatch {
                expected: self.file_size,
                actual: actual_len,
            });
        }
        if self.block_size == 0 || self.block_size > u32::MAX as u64 {
            return Err(Error::InvalidHeader);
        }
        let layout_size = self
            .physical_block_count
            .checked_mul(self.stride())
            .and_then(|blocks| blocks.checked_add(HEADER_SIZE as u64));
        if layout_size != Some(self.file_size) {
            return Err(Error::InvalidHeader);
        }
        if self.physical_block_count > i32::MAX as u64 {
            return Err(Error::InvalidHeader);
        }
        Ok(())
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        encode_into(&mut &mut buf[..], self).expect("header should fit its buffer");
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::InvalidHeader);
        }
        decode_from(&bytes[..HEADER_SIZE])
    }
}

pub fn encode_into<W: Write>(writer: &mut W, header: &FileHeader) -> Result<()> {
    writer
        .write_u64::<NativeEndian>(header.magic_number)
        .map_err(|e| Error::Encode("magic_number", e))?;
    writer
        .write_u64::<NativeEndian>(header.file_size)
        .map_err(|e| Error::Encode("file_size", e))?;
    writer
        .write_u64::<NativeEndian>(header.block_size)
        .map_err(|e| Error::Encode("block_size", e))?;
    writer
        .write_u64::<NativeEndian>(header.physical_block_count)
        .map_err(|e| Error::Encode("physical_block_count", e))?;
    Ok(())
}

pub fn decode_from<R: Read>(mut reader: R) -> Result<FileHeader> {
    let magic_number = reader
        .read_u64::<NativeEndian>()
        .map_err(|e| Error::Decode("magic_number", e))?;
    let file_size = reader
        .read_u64::<NativeEndian>()
        .map_err(|e| Error::Decode("file_size", e))?;
    let block_size = reader
        .read_u64::<NativeEndian>()
        .map_err(|e| Error::Decode("block_size", e))?;
    let physical_block_count = reader
        .read_u64::<NativeEndian>()
        .map_err(|e| Error::Decode("physical_block_count", e))?;

    Ok(FileHeader {
        magic_number,
        file_size,
        block_size,
        physical_block_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with_blocks(block_size: u64, count: u64) -> FileHeader {
        let mut header = FileHeader::empty(block_size);
        header.physical_block_count = count;
        header.file_size = HEADER_SIZE as u64 + count * header.stride();
        header
    }

    #[test]
    fn test_header_encoding_decoding() {
        let header = header_with_blocks(64, 10);

        let encoded = header.encode();
        assert_eq!(encoded.len(), HEADER_SIZE);

        let decoded = FileHeader::decode(&encoded).expect("Failed to decode header");
        assert_eq!(header, decoded);
        assert_eq!(decoded.version(), FORMAT_VERSION);
    }

    #[test]
    fn test_empty_header_validates() {
        let header = FileHeader::empty(64);
        header.validate(HEADER_SIZE as u64).expect("empty header is valid");
        assert_eq!(header.capacity(), 0);
    }

    #[test]
    fn test_magic_validation() {
        let mut header = header_with_blocks(64, 2);
        header.magic_number = (0xdead_beef << 4) | FORMAT_VERSION as u64;
        assert!(matches!(
            header.validate(header.file_size),
            Err(Error::InvalidMagic(0xdead_beef))
        ));
    }

    #[test]
    fn test_version_validation() {
        let mut header = header_with_blocks(64, 2);
        header.magic_number = (MAGIC << 4) | 0x7;
        assert!(matches!(
            header.validate(header.file_size),
            Err(Error::UnsupportedVersion(7))
        ));
    }

    #[test]
    fn test_file_size_validation() {
        let header = header_with_blocks(64, 2);
        let result = header.validate(header.file_size - 1);
        assert!(matches!(result, Err(Error::FileSizeMismatch { .. })));
    }

    #[test]
    fn test_block_size_out_of_range() {
        let header = FileHeader::empty(1 << 40);
        assert!(matches!(
            header.validate(HEADER_SIZE as u64),
            Err(Error::InvalidHeader)
        ));

        let header = FileHeader::empty(0);
        assert!(matches!(
            header.validate(HEADER_SIZE as u64),
            Err(Error::InvalidHeader)
        ));
    }

    #[test]
    fn test_inconsistent_block_count() {
        let mut header = header_with_blocks(64, 2);
        header.physical_block_count = 3;
        assert!(matches!(
            header.validate(header.file_size),
            Err(Error::InvalidHeader)
        ));
    }

    #[test]
    fn test_decoding_invalid_length() {
        let invalid_data = [0u8; HEADER_SIZE - 2];
        match FileHeader::decode(&invalid_data) {
            Err(Error::InvalidHeader) => {}
            other => panic!("Expected InvalidHeader error, got {:?}", other),
        }
    }

    #[test]
    fn test_block_offsets() {
        let header = header_with_blocks(64, 4);
        assert_eq!(header.block_offset(0), HEADER_SIZE as u64);
        assert_eq!(
            header.block_offset(3),
            HEADER_SIZE as u64 + 3 * (64 + DESCRIPTOR_SIZE as u64)
        );
        assert_eq!(header.capacity(), 256);
    }
}
