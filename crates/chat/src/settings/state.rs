use std::path::{Path, PathBuf};
use std::time::Duration;

use aiko_assistant::ClientConfig;
use aiko_storage::DEFAULT_QUOTA_BYTES;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5002";
pub const SETTINGS_DIRECTORY_NAME: &str = "aiko";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "AIKO_";

const ARCHIVE_DIRECTORY_NAME: &str = "recent_chats";
const ARCHIVE_DATABASE_NAME: &str = "aiko.db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: None,
        }
    }
}

impl BackendSettings {
    pub fn client_config(&self) -> ClientConfig {
        let config = ClientConfig::new(self.base_url.clone());
        match self.request_timeout_secs {
            Some(seconds) => config.with_request_timeout(Duration::from_secs(seconds)),
            None => config,
        }
    }

    fn normalized(mut self) -> Self {
        self.base_url = if self.base_url.trim().is_empty() {
            default_base_url()
        } else {
            self.base_url.trim().to_string()
        };
        self.request_timeout_secs = self.request_timeout_secs.filter(|seconds| *seconds > 0);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub kind: StoreKind,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            path: None,
            quota_bytes: default_quota_bytes(),
        }
    }
}

impl StoreSettings {
    /// Where the archive lives: the configured path, or a per-kind location
    /// under the user data directory. `None` for the memory store, or when no
    /// data directory can be determined.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        if self.kind == StoreKind::Memory {
            return None;
        }
        if let Some(path) = &self.path {
            return Some(path.clone());
        }

        let data_dir = dirs::data_dir()?.join(SETTINGS_DIRECTORY_NAME);
        match self.kind {
            StoreKind::File => Some(data_dir.join(ARCHIVE_DIRECTORY_NAME)),
            StoreKind::Sqlite => Some(data_dir.join(ARCHIVE_DATABASE_NAME)),
            StoreKind::Memory => None,
        }
    }

    fn normalized(mut self) -> Self {
        self.path = self.path.filter(|path| !path.as_os_str().is_empty());
        if self.quota_bytes == 0 {
            self.quota_bytes = default_quota_bytes();
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

impl Settings {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".aiko"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Loads defaults, then the JSON file at `path` (if present), then
    /// `AIKO_`-prefixed environment variables (`AIKO_BACKEND__BASE_URL`).
    ///
    /// Unparseable settings fall back to defaults.
    pub fn load(path: &Path) -> Self {
        let figment = Self::figment(path).merge(Env::prefixed(ENV_PREFIX).split("__"));
        match Self::extract(figment) {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(
                    path = ?path,
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Reads the JSON file at `path` over the defaults, ignoring the environment.
    pub fn load_file(path: &Path) -> Result<Self, SettingsError> {
        Self::extract(Self::figment(path))
    }

    pub fn normalized(self) -> Self {
        Self {
            backend: self.backend.normalized(),
            store: self.store.normalized(),
        }
    }

    fn figment(path: &Path) -> Figment {
        let figment = Figment::from(Serialized::defaults(Self::default()));
        if path.exists() {
            figment.merge(Json::file(path))
        } else {
            tracing::info!(path = ?path, "settings file not found, using defaults");
            figment
        }
    }

    fn extract(figment: Figment) -> Result<Self, SettingsError> {
        figment
            .extract::<Self>()
            .map(Self::normalized)
            .map_err(Box::new)
            .context(ExtractSnafu {
                stage: "extract-settings",
            })
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to extract settings on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        source: Box<figment::Error>,
    },
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_quota_bytes() -> u64 {
    DEFAULT_QUOTA_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let settings = Settings::load_file(&dir.path().join(SETTINGS_FILE_NAME)).unwrap();

        assert_eq!(settings, Settings::default());
        assert_eq!(settings.backend.base_url, "http://localhost:5002");
        assert_eq!(settings.store.kind, StoreKind::File);
        assert_eq!(settings.store.quota_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn partial_file_is_layered_over_defaults_and_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(
            &path,
            r#"{
                "backend": {
                    "base_url": "  http://assistant.internal:8080  ",
                    "request_timeout_secs": 0
                },
                "store": { "kind": "sqlite", "quota_bytes": 0 }
            }"#,
        )
        .unwrap();

        let settings = Settings::load_file(&path).unwrap();

        assert_eq!(settings.backend.base_url, "http://assistant.internal:8080");
        assert_eq!(settings.backend.request_timeout_secs, None);
        assert_eq!(settings.store.kind, StoreKind::Sqlite);
        assert_eq!(settings.store.quota_bytes, DEFAULT_QUOTA_BYTES);
        assert_eq!(settings.store.path, None);
    }

    #[test]
    fn malformed_file_is_an_extract_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, r#"{ "store": { "kind": "floppy" } }"#).unwrap();

        let error = Settings::load_file(&path).unwrap_err();

        assert!(matches!(error, SettingsError::Extract { .. }));
    }

    #[test]
    fn serialized_settings_load_back_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        let settings = Settings {
            backend: BackendSettings {
                base_url: "http://127.0.0.1:9000".to_string(),
                request_timeout_secs: Some(30),
            },
            store: StoreSettings {
                kind: StoreKind::Memory,
                path: Some(dir.path().join("archive")),
                quota_bytes: 1024,
            },
        };

        std::fs::write(&path, serde_json::to_string_pretty(&settings).unwrap()).unwrap();

        assert_eq!(Settings::load_file(&path).unwrap(), settings);
    }

    #[test]
    fn timeout_flows_into_client_config() {
        let backend = BackendSettings {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: Some(12),
        };

        let config = backend.client_config();

        assert_eq!(config.request_timeout, Some(Duration::from_secs(12)));
        assert_eq!(BackendSettings::default().client_config().request_timeout, None);
    }

    #[test]
    fn memory_store_has_no_path_and_explicit_paths_win() {
        let memory = StoreSettings {
            kind: StoreKind::Memory,
            path: Some(PathBuf::from("/tmp/ignored")),
            ..StoreSettings::default()
        };
        assert_eq!(memory.resolved_path(), None);

        let sqlite = StoreSettings {
            kind: StoreKind::Sqlite,
            path: Some(PathBuf::from("/tmp/aiko-test.db")),
            ..StoreSettings::default()
        };
        assert_eq!(sqlite.resolved_path(), Some(PathBuf::from("/tmp/aiko-test.db")));
    }
}
