pub mod archive;
pub mod chat;
pub mod session;
pub mod settings;
pub mod store;
#[cfg(test)]
mod testing;

pub use archive::{HydrationOutcome, PersistenceStatus, RecentChatEntry, RecentChats};
pub use session::{ExchangeOutcome, Session, SessionError, SessionResult};
pub use settings::{Settings, SettingsError};
pub use store::{StoreSetupError, open_archive_store};
