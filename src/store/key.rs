use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// Bytes reserved for the id inside a block descriptor, NUL terminator included.
pub const ID_CAPACITY: usize = 128;

/// Sorting key of a stored item. Items are ordered by `time`, then `id`, then
/// `priority`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub id: String,
    pub priority: u32,
    /// Milliseconds since the Unix epoch. Zero is replaced by the save time.
    pub time: u64,
}

impl ItemKey {
    pub fn new(id: impl Into<String>, priority: u32, time: u64) -> Self {
        let mut id = id.into();
        truncate_id(&mut id);
        Self { id, priority, time }
    }

    /// Key stamped with the current time.
    pub fn now() -> Self {
        Self {
            id: String::new(),
            priority: 0,
            time: now_millis(),
        }
    }

    pub(crate) fn encode_id(&self) -> [u8; ID_CAPACITY] {
        let mut buf = [0u8; ID_CAPACITY];
        let bytes = self.id.as_bytes();
        let len = bytes.len().min(ID_CAPACITY - 1);
        buf[..len].copy_from_slice(&bytes[..len]);
        buf
    }

    pub(crate) fn decode_id(raw: &[u8]) -> String {
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }
}

impl Ord for ItemKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.id.cmp(&other.id))
            .then_with(|| self.priority.cmp(&other.priority))
    }
}

impl PartialOrd for ItemKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Position of a logical block in the index: the item key with the head block
/// id as final tie-break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey {
    pub item: ItemKey,
    pub block: u32,
}

impl IndexKey {
    pub fn new(item: ItemKey, block: u32) -> Self {
        Self { item, block }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn truncate_id(id: &mut String) {
    if id.len() < ID_CAPACITY {
        return;
    }
    let mut end = ID_CAPACITY - 1;
    while !id.is_char_boundary(end) {
        end -= 1;
    }
    id.truncate(end);
}
