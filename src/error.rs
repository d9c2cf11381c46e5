use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    Decode(&'static str, io::Error),
    Encode(&'static str, io::Error),
    ReadError(&'static str, io::Error),
    WriteError(&'static str, io::Error),
    InvalidHeader,
    InvalidMagic(u64),
    UnsupportedVersion(u8),
    FileSizeMismatch { expected: u64, actual: u64 },
    NotOpen,
    AlreadyOpen,
    InvalidArgument(String),
    ItemTooLarge { size: usize, capacity: u64 },
    SizeTooLarge { requested: u64, max: u64 },
    FileNotOpenable(PathBuf, io::Error),
    AdjustSizeFailed(String),
    CorruptedChain(String),
    NoMoreItems,
    StaleCursor,
    Serialization(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::Decode(field, err) => write!(f, "Failed to decode {}: {}", field, err),
            Error::Encode(field, err) => write!(f, "Failed to encode {}: {}", field, err),
            Error::ReadError(context, err) => write!(f, "Failed to read {}: {}", context, err),
            Error::WriteError(context, err) => write!(f, "Failed to write {}: {}", context, err),
            Error::InvalidHeader => write!(f, "Invalid header"),
            Error::InvalidMagic(magic) => write!(f, "Invalid magic number: {:#x}", magic),
            Error::UnsupportedVersion(v) => write!(f, "Unsupported format version: {}", v),
            Error::FileSizeMismatch { expected, actual } => write!(
                f,
                "File size mismatch: header says {}, file is {}",
                expected, actual
            ),
            Error::NotOpen => write!(f, "Storage file is not open"),
            Error::AlreadyOpen => write!(f, "Storage file is already open"),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::ItemTooLarge { size, capacity } => write!(
                f,
                "Item of {} bytes does not fit a store of {} bytes",
                size, capacity
            ),
            Error::SizeTooLarge { requested, max } => write!(
                f,
                "Requested file size {} exceeds the maximum of {}",
                requested, max
            ),
            Error::FileNotOpenable(path, err) => {
                write!(f, "Cannot open or create {:?}: {}", path, err)
            }
            Error::AdjustSizeFailed(msg) => write!(f, "Failed to adjust file size: {}", msg),
            Error::CorruptedChain(msg) => write!(f, "Corrupted block chain: {}", msg),
            Error::NoMoreItems => write!(f, "No more items"),
            Error::StaleCursor => write!(f, "Cursor item is no longer stored"),
            Error::Serialization(msg) => write!(f, "Serialization failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err)
            | Error::Decode(_, err)
            | Error::Encode(_, err)
            | Error::ReadError(_, err)
            | Error::WriteError(_, err)
            | Error::FileNotOpenable(_, err) => Some(err),
            _ => None,
        }
    }
}
