//! Opens the archive store selected in settings.

use std::path::PathBuf;
use std::sync::Arc;

use aiko_storage::{ArchiveStore, FileStore, MemoryStore, SqliteStore, StorageError};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::settings::{StoreKind, StoreSettings};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreSetupError {
    #[snafu(display("no data directory available for the {kind:?} store on `{stage}`"))]
    MissingDataDirectory { stage: &'static str, kind: StoreKind },
    #[snafu(display("failed to open {kind:?} store at {path:?} on `{stage}`: {source}"))]
    Open {
        stage: &'static str,
        kind: StoreKind,
        path: PathBuf,
        source: StorageError,
    },
}

pub async fn open_archive_store(
    settings: &StoreSettings,
) -> Result<Arc<dyn ArchiveStore>, StoreSetupError> {
    if settings.kind == StoreKind::Memory {
        tracing::info!(quota_bytes = settings.quota_bytes, "using in-memory archive store");
        return Ok(Arc::new(MemoryStore::with_quota(settings.quota_bytes)));
    }

    let path = settings.resolved_path().context(MissingDataDirectorySnafu {
        stage: "resolve-store-path",
        kind: settings.kind,
    })?;

    let store: Arc<dyn ArchiveStore> = match settings.kind {
        StoreKind::File => Arc::new(FileStore::with_quota(path.clone(), settings.quota_bytes)),
        StoreKind::Sqlite => {
            let location = path.to_string_lossy().into_owned();
            let store = SqliteStore::open_with_quota(&location, settings.quota_bytes)
                .await
                .context(OpenSnafu {
                    stage: "open-sqlite-store",
                    kind: settings.kind,
                    path: path.clone(),
                })?;
            Arc::new(store)
        }
        StoreKind::Memory => Arc::new(MemoryStore::with_quota(settings.quota_bytes)),
    };

    tracing::info!(kind = ?settings.kind, path = ?path, "opened archive store");
    Ok(store)
}
