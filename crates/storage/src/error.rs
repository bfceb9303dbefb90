use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display(
        "archive store quota exceeded writing '{key}': \
         {required_bytes} bytes needed, {quota_bytes} allowed"
    ))]
    QuotaExceeded {
        stage: &'static str,
        key: String,
        required_bytes: u64,
        quota_bytes: u64,
    },
    #[snafu(display("archive store key '{key}' is invalid"))]
    InvalidKey { stage: &'static str, key: String },
    #[snafu(display("storage invariant violation: {details}"))]
    InvariantViolation {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("failed to create archive store directory at {path}"))]
    CreateStoreDirectory {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to read archive entry from {path}"))]
    ReadEntry {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to write archive entry to {path}"))]
    WriteEntry {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to replace archive entry from {from} to {to}"))]
    RenameTempFile {
        stage: &'static str,
        from: String,
        to: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to remove archive entry at {path}"))]
    RemoveEntry {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to create sqlite directory at {path}"))]
    CreateSqliteDirectory {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to parse sqlite connection URL '{database_url}'"))]
    SqliteConnectOptions {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[snafu(display("failed to connect sqlite database '{database_url}'"))]
    SqliteConnect {
        stage: &'static str,
        database_url: String,
        source: sqlx::Error,
    },
    #[snafu(display("failed to run sqlite migrations"))]
    SqliteMigrate {
        stage: &'static str,
        source: sqlx::migrate::MigrateError,
    },
    #[snafu(display("sqlite query failed at {stage}: {source}"))]
    SqliteQuery {
        stage: &'static str,
        source: sqlx::Error,
    },
    #[snafu(display("failed to spawn sqlite worker thread"))]
    SqliteThreadSpawn {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to initialize sqlite worker runtime"))]
    SqliteRuntimeInit {
        stage: &'static str,
        source: std::io::Error,
    },
}

impl StorageError {
    /// Returns true when the store rejected a write for lack of space.
    ///
    /// Callers treat this differently from every other failure: the persisted
    /// value is dropped instead of being left behind half-updated.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
