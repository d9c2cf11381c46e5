use super::block::{PhysicalBlock, DESCRIPTOR_SIZE};
use super::header::{FileHeader, HEADER_SIZE};
use crate::error::Result;
use crate::Error;

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Positioned reads and writes against the backing file.
pub struct BlockFile {
    file: File,
    path: PathBuf,
}

impl std::fmt::Debug for BlockFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockFile").field("path", &self.path).finish()
    }
}

impl BlockFile {
    /// Opens an existing file for reading and writing.
    pub fn open_existing(path: &Path) -> io::Result<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Creates the file, truncating whatever was there.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Opens a file without write access, so every write through it fails.
    #[cfg(test)]
    pub(crate) fn open_read_only(path: &Path) -> io::Result<Self> {
        let file = File::options().read(true).open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn read_header(&mut self) -> Result<FileHeader> {
        let mut buf = [0u8; HEADER_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        match self.file.read_exact(&mut buf) {
            Ok(()) => FileHeader::decode(&buf),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::InvalidHeader),
            Err(e) => Err(Error::ReadError("file header", e)),
        }
    }

    pub fn write_header(&mut self, header: &FileHeader) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file
            .write_all(&header.encode())
            .map_err(|e| Error::WriteError("file header", e))
    }

    pub fn read_descriptor(&mut self, offset: u64) -> Result<[u8; DESCRIPTOR_SIZE]> {
        let mut buf = [0u8; DESCRIPTOR_SIZE];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file
            .read_exact(&mut buf)
            .map_err(|e| Error::ReadError("block descriptor", e))?;
        Ok(buf)
    }

    pub fn write_descriptor(&mut self, block: &PhysicalBlock) -> Result<()> {
        self.file.seek(SeekFrom::Start(block.file_offset))?;
        self.file
            .write_all(&block.encode())
            .map_err(|e| Error::WriteError("block descriptor", e))
    }

    /// Writes the descriptor followed by this block's slice of the payload.
    pub fn write_block(&mut self, block: &PhysicalBlock, payload: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(DESCRIPTOR_SIZE + payload.len());
        buf.extend_from_slice(&block.encode());
        buf.extend_from_slice(payload);

        self.file.seek(SeekFrom::Start(block.file_offset))?;
        self.file
            .write_all(&buf)
            .map_err(|e| Error::WriteError("block payload", e))
    }

    /// Appends `len` payload bytes of `block` to `out`.
    pub fn read_payload(
        &mut self,
        block: &PhysicalBlock,
        len: usize,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let start = out.len();
        out.resize(start + len, 0);
        self.file.seek(SeekFrom::Start(block.payload_offset()))?;
        if let Err(e) = self.file.read_exact(&mut out[start..]) {
            out.truncate(start);
            return Err(Error::ReadError("block payload", e));
        }
        Ok(())
    }

    /// Grows the file to `size` bytes by writing its last byte, leaving the
    /// gap sparse where the filesystem allows it.
    pub fn extend_to(&mut self, size: u64) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(size - 1))?;
        self.file
            .write_all(b" ")
            .map_err(|e| Error::WriteError("file extension", e))
    }

    pub fn flush(&mut self, sync: bool) -> Result<()> {
        self.file.flush()?;
        if sync {
            self.file.sync_data()?;
        }
        Ok(())
    }
}
