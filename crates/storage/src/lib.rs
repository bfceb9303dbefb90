pub mod error;
pub mod file;
pub mod memory;
pub mod sqlite;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Key under which the recent-chat archive is persisted.
pub const RECENT_CHATS_KEY: &str = "recent_chats";

/// Default byte budget, sized like a browser local-storage origin.
pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

/// String-keyed durable store with a bounded byte budget.
///
/// `set` replaces the whole value or fails without touching the previous one.
/// A write that would exceed the budget fails with
/// [`StorageError::QuotaExceeded`].
pub trait ArchiveStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    /// Removing a key that is not present is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;
}

pub(crate) fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}
