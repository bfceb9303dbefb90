pub mod state;

pub use state::{BackendSettings, Settings, SettingsError, StoreKind, StoreSettings};
