pub mod config;
pub mod encoding;
pub mod error;
pub mod hasher;
pub mod store;

#[cfg(test)]
mod tmpfs;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use store::{
    FifoStore, FileStats, FoundItem, ItemKey, OfflineStorage, RemovedItem, StoredItem,
};
