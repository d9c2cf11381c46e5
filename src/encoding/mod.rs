//! Serialization of typed records stored as items.

pub mod bincode;

pub use self::bincode::{deserialize, serialize};
