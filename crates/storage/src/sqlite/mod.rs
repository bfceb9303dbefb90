//! SQLite-backed archive store.
//!
//! One worker thread owns a current-thread runtime and a single-connection
//! pool for the lifetime of the store. The sync trait methods hand jobs to it
//! over a channel and block on the reply, so they are safe to call from
//! inside an async runtime, and in-memory databases keep their schema because
//! the connection is never recycled.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::mpsc;
use std::time::Duration;

use snafu::ResultExt;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tokio::sync::oneshot;

use super::error::{
    CreateSqliteDirectorySnafu, InvariantViolationSnafu, SqliteConnectOptionsSnafu,
    SqliteConnectSnafu, SqliteMigrateSnafu, SqliteQuerySnafu, SqliteRuntimeInitSnafu,
    SqliteThreadSpawnSnafu, StorageError, StorageResult,
};
use super::{ArchiveStore, DEFAULT_QUOTA_BYTES, entry_size};

const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Job = Box<dyn FnOnce(SqlitePool) -> JobFuture + Send>;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    jobs: mpsc::Sender<Job>,
    quota_bytes: u64,
}

impl SqliteStore {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        Self::open_with_quota(database_location, DEFAULT_QUOTA_BYTES).await
    }

    /// Opens (creating if needed) the database at `database_location`: a file
    /// path, a `sqlite:` URL, or `:memory:`.
    pub async fn open_with_quota(database_location: &str, quota_bytes: u64) -> StorageResult<Self> {
        let location = DatabaseLocation::parse(database_location);
        let connect_options = location.connect_options()?;
        let description = location.to_string();

        let (jobs, queue) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("sqlite-archive-store".to_string())
            .spawn(move || serve_jobs(connect_options, description, queue, ready_tx))
            .context(SqliteThreadSpawnSnafu {
                stage: "sqlite-open-spawn-worker",
            })?;

        match ready_rx.await {
            Ok(result) => result?,
            Err(_) => {
                return InvariantViolationSnafu {
                    stage: "sqlite-open-await-worker",
                    details: "sqlite worker stopped before reporting readiness".to_string(),
                }
                .fail();
            }
        }

        tracing::info!(location = %location, quota_bytes, "opened sqlite archive store");
        Ok(Self { jobs, quota_bytes })
    }

    /// Runs `op` against the worker's pool and waits for its result.
    fn run_db_call<T, F, Fut>(&self, stage: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(SqlitePool) -> Fut + Send + 'static,
        Fut: Future<Output = StorageResult<T>> + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        let job: Job = Box::new(move |pool: SqlitePool| -> JobFuture {
            Box::pin(async move {
                // The caller only disappears if it panicked; nothing to report to.
                let _ = reply_tx.send(op(pool).await);
            })
        });

        let worker_stopped = || StorageError::InvariantViolation {
            stage,
            details: "sqlite worker is no longer running".to_string(),
        };
        self.jobs.send(job).map_err(|_| worker_stopped())?;
        reply_rx.recv().map_err(|_| worker_stopped())?
    }
}

/// Worker thread body: connect and migrate, report readiness, then execute
/// jobs in arrival order until every store handle is dropped.
fn serve_jobs(
    connect_options: SqliteConnectOptions,
    description: String,
    queue: mpsc::Receiver<Job>,
    ready: oneshot::Sender<StorageResult<()>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context(SqliteRuntimeInitSnafu {
            stage: "sqlite-worker-runtime-build",
        }) {
        Ok(runtime) => runtime,
        Err(error) => {
            let _ = ready.send(Err(error));
            return;
        }
    };

    let pool = match runtime.block_on(connect_and_migrate(connect_options, &description)) {
        Ok(pool) => pool,
        Err(error) => {
            let _ = ready.send(Err(error));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        runtime.block_on(pool.close());
        return;
    }

    while let Ok(job) = queue.recv() {
        runtime.block_on(job(pool.clone()));
    }

    runtime.block_on(pool.close());
    tracing::debug!(location = %description, "sqlite archive worker stopped");
}

async fn connect_and_migrate(
    connect_options: SqliteConnectOptions,
    description: &str,
) -> StorageResult<SqlitePool> {
    // A single pinned connection: in-memory databases live exactly as long as it does.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(connect_options)
        .await
        .context(SqliteConnectSnafu {
            stage: "sqlite-open-connect",
            database_url: description.to_string(),
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context(SqliteMigrateSnafu {
            stage: "sqlite-open-migrate",
        })?;

    Ok(pool)
}

impl ArchiveStore for SqliteStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let key = key.to_string();
        self.run_db_call("archive-get", move |pool| async move {
            sqlx::query_scalar::<_, String>("SELECT value FROM archive_entries WHERE key = ?")
                .bind(key)
                .fetch_optional(&pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "archive-get-select",
                })
        })
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let quota_bytes = self.quota_bytes;
        let key = key.to_string();
        let value = value.to_string();
        self.run_db_call("archive-set", move |pool| async move {
            let mut tx = pool.begin().await.context(SqliteQuerySnafu {
                stage: "archive-set-begin",
            })?;

            let others: i64 = sqlx::query_scalar(
                "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0) \
                 FROM archive_entries WHERE key != ?",
            )
            .bind(&key)
            .fetch_one(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "archive-set-measure",
            })?;

            let required_bytes =
                i64_to_u64(others, "archive-set-measure")? + entry_size(&key, &value);
            if required_bytes > quota_bytes {
                // Dropping the transaction rolls it back; the stored value stays as it was.
                return Err(StorageError::QuotaExceeded {
                    stage: "archive-set-quota",
                    key,
                    required_bytes,
                    quota_bytes,
                });
            }

            sqlx::query(
                "INSERT INTO archive_entries (key, value, updated_at) \
                 VALUES (?, ?, CAST(strftime('%s', 'now') AS INTEGER)) \
                 ON CONFLICT(key) DO UPDATE SET \
                 value = excluded.value, updated_at = excluded.updated_at",
            )
            .bind(&key)
            .bind(&value)
            .execute(&mut *tx)
            .await
            .context(SqliteQuerySnafu {
                stage: "archive-set-upsert",
            })?;

            tx.commit().await.context(SqliteQuerySnafu {
                stage: "archive-set-commit",
            })
        })
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let key = key.to_string();
        self.run_db_call("archive-remove", move |pool| async move {
            sqlx::query("DELETE FROM archive_entries WHERE key = ?")
                .bind(key)
                .execute(&pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "archive-remove-delete",
                })?;
            Ok(())
        })
    }
}

/// Where the archive database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DatabaseLocation {
    Memory,
    Url(String),
    File(PathBuf),
}

impl DatabaseLocation {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == ":memory:" || raw == "sqlite::memory:" {
            Self::Memory
        } else if raw.starts_with("sqlite:") {
            Self::Url(raw.to_string())
        } else {
            Self::File(PathBuf::from(raw))
        }
    }

    fn connect_options(&self) -> StorageResult<SqliteConnectOptions> {
        let options = match self {
            // The memory database has no journal file to switch to WAL.
            Self::Memory => {
                return Ok(parse_url("sqlite::memory:")?.busy_timeout(BUSY_TIMEOUT));
            }
            Self::Url(url) => parse_url(url)?,
            Self::File(path) => {
                create_parent_directory(path)?;
                SqliteConnectOptions::new().filename(path)
            }
        };

        Ok(options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT))
    }
}

impl std::fmt::Display for DatabaseLocation {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => formatter.write_str(":memory:"),
            Self::Url(url) => formatter.write_str(url),
            Self::File(path) => write!(formatter, "{}", path.display()),
        }
    }
}

fn parse_url(url: &str) -> StorageResult<SqliteConnectOptions> {
    SqliteConnectOptions::from_str(url).context(SqliteConnectOptionsSnafu {
        stage: "sqlite-open-parse-url",
        database_url: url.to_string(),
    })
}

fn create_parent_directory(path: &Path) -> StorageResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
                stage: "sqlite-open-create-directory",
                path: parent.display().to_string(),
            })
        }
        _ => Ok(()),
    }
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value.try_into().map_err(|_| StorageError::InvariantViolation {
        stage,
        details: format!("expected non-negative value, got {value}"),
    })
}
