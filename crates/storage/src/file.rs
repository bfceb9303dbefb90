use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use snafu::{ResultExt, ensure};

use super::error::{
    CreateStoreDirectorySnafu, InvalidKeySnafu, QuotaExceededSnafu, ReadEntrySnafu,
    RemoveEntrySnafu, RenameTempFileSnafu, StorageError, StorageResult, WriteEntrySnafu,
};
use super::{ArchiveStore, DEFAULT_QUOTA_BYTES, entry_size};

const ENTRY_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "json.tmp";

/// Directory-backed store holding one `<key>.json` file per key.
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
    quota_bytes: u64,
}

impl FileStore {
    pub fn new(directory: PathBuf) -> Self {
        Self::with_quota(directory, DEFAULT_QUOTA_BYTES)
    }

    pub fn with_quota(directory: PathBuf, quota_bytes: u64) -> Self {
        Self {
            directory,
            quota_bytes,
        }
    }

    fn entry_path(&self, key: &str, stage: &'static str) -> StorageResult<PathBuf> {
        ensure!(
            is_valid_key(key),
            InvalidKeySnafu {
                stage,
                key: key.to_string(),
            }
        );
        Ok(self.directory.join(format!("{key}.{ENTRY_EXTENSION}")))
    }

    /// Sums stored bytes for every key except `skip_key`.
    fn used_bytes_excluding(&self, skip_key: &str) -> StorageResult<u64> {
        let listing = match std::fs::read_dir(&self.directory) {
            Ok(listing) => listing,
            Err(source) if source.kind() == ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(StorageError::ReadEntry {
                    stage: "file-store-list-directory",
                    path: display_path(&self.directory),
                    source,
                });
            }
        };

        let mut used = 0;
        for item in listing {
            let item = item.context(ReadEntrySnafu {
                stage: "file-store-list-entry",
                path: display_path(&self.directory),
            })?;
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if key == skip_key {
                continue;
            }

            let metadata = item.metadata().context(ReadEntrySnafu {
                stage: "file-store-entry-metadata",
                path: display_path(&path),
            })?;
            used += key.len() as u64 + metadata.len();
        }

        Ok(used)
    }
}

impl ArchiveStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.entry_path(key, "file-store-get")?;
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(source) if source.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::ReadEntry {
                stage: "file-store-get-read",
                path: display_path(&path),
                source,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.entry_path(key, "file-store-set")?;
        let required_bytes = self.used_bytes_excluding(key)? + entry_size(key, value);
        ensure!(
            required_bytes <= self.quota_bytes,
            QuotaExceededSnafu {
                stage: "file-store-set-quota",
                key: key.to_string(),
                required_bytes,
                quota_bytes: self.quota_bytes,
            }
        );

        std::fs::create_dir_all(&self.directory).context(CreateStoreDirectorySnafu {
            stage: "file-store-create-directory",
            path: display_path(&self.directory),
        })?;

        // Write-then-rename so readers never observe a truncated entry.
        let temp_path = path.with_extension(TEMP_EXTENSION);
        std::fs::write(&temp_path, value).context(WriteEntrySnafu {
            stage: "file-store-write-temporary",
            path: display_path(&temp_path),
        })?;
        std::fs::rename(&temp_path, &path).context(RenameTempFileSnafu {
            stage: "file-store-rename-temporary",
            from: display_path(&temp_path),
            to: display_path(&path),
        })?;

        tracing::debug!(key, bytes = value.len(), path = %path.display(), "archive entry written");
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.entry_path(key, "file-store-remove")?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::RemoveEntry {
                stage: "file-store-remove-file",
                path: display_path(&path),
                source,
            }),
        }
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || matches!(character, '_' | '-'))
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}
