use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use snafu::ensure;

use super::error::{QuotaExceededSnafu, StorageResult};
use super::{ArchiveStore, DEFAULT_QUOTA_BYTES, entry_size};

/// Process-local store; contents vanish with the process.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_quota(DEFAULT_QUOTA_BYTES)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ArchiveStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.lock();
        let others: u64 = entries
            .iter()
            .filter(|(existing, _)| existing.as_str() != key)
            .map(|(existing, stored)| entry_size(existing, stored))
            .sum();
        let required_bytes = others + entry_size(key, value);

        ensure!(
            required_bytes <= self.quota_bytes,
            QuotaExceededSnafu {
                stage: "memory-store-set",
                key: key.to_string(),
                required_bytes,
                quota_bytes: self.quota_bytes,
            }
        );

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.lock().remove(key);
        Ok(())
    }
}
