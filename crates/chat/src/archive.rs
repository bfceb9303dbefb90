//! Bounded, newest-first archive of completed exchanges.
//!
//! The in-memory sequence is authoritative for the running process. Every
//! mutation rewrites the whole persisted sequence under one key, so the stored
//! copy is either the latest full snapshot, an older full snapshot, or absent.

use std::sync::Arc;

use aiko_storage::{ArchiveStore, RECENT_CHATS_KEY};
use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};

use crate::chat::Message;

/// Hard capacity of the archive.
pub const MAX_RECENT_CHATS: usize = 5;

/// Number of utterance characters kept in an entry title.
pub const TITLE_SOURCE_CHARS: usize = 20;

const TITLE_ELLIPSIS: &str = "...";

/// Matches the `en-US` locale rendering, e.g. `3/14/2025, 9:05:02 PM`.
const TIMESTAMP_FORMAT: &str = "%-m/%-d/%Y, %-I:%M:%S %p";

/// Immutable record of one completed user/assistant exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentChatEntry {
    title: String,
    timestamp: String,
    messages: [Message; 2],
}

impl RecentChatEntry {
    /// Captures an exchange stamped with the current local time.
    pub fn from_exchange(user: Message, assistant: Message) -> Self {
        Self::with_timestamp(user, assistant, current_timestamp())
    }

    pub fn with_timestamp(user: Message, assistant: Message, timestamp: impl Into<String>) -> Self {
        Self {
            title: chat_title(user.text()),
            timestamp: timestamp.into(),
            messages: [user, assistant],
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

/// Derives an entry title from the triggering utterance.
pub fn chat_title(text: &str) -> String {
    let mut characters = text.chars();
    let head: String = characters.by_ref().take(TITLE_SOURCE_CHARS).collect();
    if characters.next().is_some() {
        format!("{head}{TITLE_ELLIPSIS}")
    } else {
        head
    }
}

fn current_timestamp() -> String {
    format_timestamp(&Local::now())
}

/// Renders `at` the way entry timestamps are stored and shown.
pub fn format_timestamp<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Result of writing the archive through to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceStatus {
    Saved,
    /// The store ran out of room and the persisted archive was dropped.
    QuotaExceeded,
    Degraded { reason: String },
}

impl PersistenceStatus {
    pub fn is_degraded(&self) -> bool {
        !matches!(self, Self::Saved)
    }
}

/// What `hydrate` found in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HydrationOutcome {
    Restored { count: usize, truncated: usize },
    Missing,
    Unreadable { reason: String },
    Malformed { reason: String },
}

pub struct RecentChats {
    entries: Vec<RecentChatEntry>,
    store: Arc<dyn ArchiveStore>,
}

impl RecentChats {
    /// Creates an empty archive; call [`RecentChats::hydrate`] to load persisted entries.
    pub fn new(store: Arc<dyn ArchiveStore>) -> Self {
        Self {
            entries: Vec::with_capacity(MAX_RECENT_CHATS),
            store,
        }
    }

    /// Replaces the in-memory sequence with the persisted one.
    ///
    /// Never fails: unreadable or malformed stored state yields an empty archive.
    pub fn hydrate(&mut self) -> HydrationOutcome {
        self.entries.clear();

        let raw = match self.store.get(RECENT_CHATS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return HydrationOutcome::Missing,
            Err(error) => {
                tracing::warn!(
                    key = RECENT_CHATS_KEY,
                    error = %error,
                    "failed to read recent chats; starting empty"
                );
                return HydrationOutcome::Unreadable {
                    reason: error.to_string(),
                };
            }
        };

        match serde_json::from_str::<Vec<RecentChatEntry>>(&raw) {
            Ok(mut entries) => {
                let stored = entries.len();
                entries.truncate(MAX_RECENT_CHATS);
                self.entries = entries;
                HydrationOutcome::Restored {
                    count: self.entries.len(),
                    truncated: stored - self.entries.len(),
                }
            }
            Err(error) => {
                tracing::warn!(
                    key = RECENT_CHATS_KEY,
                    error = %error,
                    "discarding malformed recent chats"
                );
                HydrationOutcome::Malformed {
                    reason: error.to_string(),
                }
            }
        }
    }

    /// Prepends `entry`, evicts past capacity, then writes the whole sequence.
    pub fn insert(&mut self, entry: RecentChatEntry) -> PersistenceStatus {
        self.entries.insert(0, entry);
        self.entries.truncate(MAX_RECENT_CHATS);
        self.persist()
    }

    /// Empties the archive and removes the persisted copy.
    pub fn clear(&mut self) -> PersistenceStatus {
        self.entries.clear();
        match self.store.remove(RECENT_CHATS_KEY) {
            Ok(()) => PersistenceStatus::Saved,
            Err(error) => {
                tracing::warn!(
                    key = RECENT_CHATS_KEY,
                    error = %error,
                    "failed to remove persisted recent chats"
                );
                PersistenceStatus::Degraded {
                    reason: error.to_string(),
                }
            }
        }
    }

    pub fn list(&self) -> &[RecentChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn persist(&self) -> PersistenceStatus {
        let payload = match serde_json::to_string(&self.entries) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::error!(error = %error, "failed to serialize recent chats");
                return PersistenceStatus::Degraded {
                    reason: error.to_string(),
                };
            }
        };

        match self.store.set(RECENT_CHATS_KEY, &payload) {
            Ok(()) => {
                tracing::debug!(
                    entries = self.entries.len(),
                    bytes = payload.len(),
                    "saved recent chats"
                );
                PersistenceStatus::Saved
            }
            Err(error) if error.is_quota_exceeded() => {
                tracing::warn!(
                    key = RECENT_CHATS_KEY,
                    error = %error,
                    "archive store quota exceeded; clearing persisted recent chats"
                );
                if let Err(remove_error) = self.store.remove(RECENT_CHATS_KEY) {
                    tracing::error!(
                        key = RECENT_CHATS_KEY,
                        error = %remove_error,
                        "failed to clear persisted recent chats after quota error"
                    );
                }
                PersistenceStatus::QuotaExceeded
            }
            Err(error) => {
                tracing::error!(
                    key = RECENT_CHATS_KEY,
                    error = %error,
                    "failed to save recent chats"
                );
                PersistenceStatus::Degraded {
                    reason: error.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use aiko_storage::MemoryStore;
    use chrono::Utc;

    use super::*;
    use crate::testing::{ScriptedStore, StoreFailure};

    fn entry(utterance: &str) -> RecentChatEntry {
        RecentChatEntry::with_timestamp(
            Message::user(utterance),
            Message::assistant(format!("reply to {utterance}")),
            "1/2/2025, 3:04:05 PM",
        )
    }

    fn titles(archive: &RecentChats) -> Vec<&str> {
        archive.list().iter().map(RecentChatEntry::title).collect()
    }

    #[test]
    fn short_titles_are_kept_whole() {
        assert_eq!(chat_title("Hello"), "Hello");
        assert_eq!(chat_title("exactly twenty chars"), "exactly twenty chars");
    }

    #[test]
    fn long_titles_are_cut_at_twenty_characters() {
        let text = "abcdefghijklmnopqrstuvwxy";
        assert_eq!(text.chars().count(), 25);
        assert_eq!(chat_title(text), "abcdefghijklmnopqrst...");
    }

    #[test]
    fn titles_never_split_characters() {
        let text = "é".repeat(21);
        assert_eq!(chat_title(&text), format!("{}...", "é".repeat(20)));
    }

    #[test]
    fn timestamps_use_month_day_year_and_twelve_hour_clock() {
        let evening = Utc.with_ymd_and_hms(2025, 3, 14, 21, 5, 2).unwrap();
        let morning = Utc.with_ymd_and_hms(2024, 11, 2, 0, 30, 9).unwrap();
        let noon = Utc.with_ymd_and_hms(2025, 1, 9, 12, 0, 0).unwrap();

        assert_eq!(format_timestamp(&evening), "3/14/2025, 9:05:02 PM");
        assert_eq!(format_timestamp(&morning), "11/2/2024, 12:30:09 AM");
        assert_eq!(format_timestamp(&noon), "1/9/2025, 12:00:00 PM");
    }

    #[test]
    fn new_entries_are_stamped_in_the_stored_format() {
        let stamped = RecentChatEntry::from_exchange(Message::user("hi"), Message::assistant("yo"));
        let reparsed =
            chrono::NaiveDateTime::parse_from_str(stamped.timestamp(), "%m/%d/%Y, %I:%M:%S %p");

        assert!(reparsed.is_ok(), "unexpected timestamp {:?}", stamped.timestamp());
    }

    #[test]
    fn stays_bounded_and_newest_first() {
        let mut archive = RecentChats::new(Arc::new(MemoryStore::new()));

        for index in 0..12 {
            archive.insert(entry(&format!("question {index}")));
            assert!(archive.len() <= MAX_RECENT_CHATS);
            assert_eq!(archive.list()[0].title(), format!("question {index}"));
        }

        assert_eq!(
            titles(&archive),
            vec!["question 11", "question 10", "question 9", "question 8", "question 7"]
        );
    }

    #[test]
    fn sixth_insert_evicts_oldest() {
        let mut archive = RecentChats::new(Arc::new(MemoryStore::new()));
        for index in 1..=5 {
            archive.insert(entry(&format!("q{index}")));
        }
        assert_eq!(archive.len(), 5);

        archive.insert(entry("q6"));

        assert_eq!(archive.len(), 5);
        assert_eq!(titles(&archive), vec!["q6", "q5", "q4", "q3", "q2"]);
    }

    #[test]
    fn restart_reproduces_sequence() {
        let store: Arc<dyn ArchiveStore> = Arc::new(MemoryStore::new());
        let mut archive = RecentChats::new(store.clone());
        for index in 0..7 {
            assert_eq!(archive.insert(entry(&format!("q{index}"))), PersistenceStatus::Saved);
        }

        let mut restarted = RecentChats::new(store);
        let outcome = restarted.hydrate();

        assert_eq!(outcome, HydrationOutcome::Restored { count: 5, truncated: 0 });
        assert_eq!(restarted.list(), archive.list());
    }

    #[test]
    fn hydrate_is_idempotent() {
        let store: Arc<dyn ArchiveStore> = Arc::new(MemoryStore::new());
        let mut writer = RecentChats::new(store.clone());
        writer.insert(entry("first"));
        writer.insert(entry("second"));

        let mut archive = RecentChats::new(store);
        archive.hydrate();
        let once = archive.list().to_vec();
        archive.hydrate();

        assert_eq!(archive.list(), once.as_slice());
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn hydrate_truncates_oversized_sequence() {
        let store = Arc::new(MemoryStore::new());
        let oversized = (0..8).map(|index| entry(&format!("q{index}"))).collect::<Vec<_>>();
        store
            .set(RECENT_CHATS_KEY, &serde_json::to_string(&oversized).unwrap())
            .unwrap();

        let mut archive = RecentChats::new(store);

        assert_eq!(archive.hydrate(), HydrationOutcome::Restored { count: 5, truncated: 3 });
        assert_eq!(archive.list(), &oversized[..5]);
    }

    #[test]
    fn malformed_state_hydrates_empty() {
        let store = Arc::new(MemoryStore::new());
        let mut archive = RecentChats::new(store.clone());

        for payload in [
            "not json",
            r#"{"title": "object, not list"}"#,
            concat!(
                r#"[{"title": "t", "timestamp": "ts", "#,
                r#""messages": [{"sender": "user", "text": "only one"}]}]"#
            ),
        ] {
            store.set(RECENT_CHATS_KEY, payload).unwrap();
            assert!(matches!(archive.hydrate(), HydrationOutcome::Malformed { .. }));
            assert!(archive.is_empty());
        }
    }

    #[test]
    fn missing_and_unreadable_state_hydrate_empty() {
        let mut archive = RecentChats::new(Arc::new(MemoryStore::new()));
        assert_eq!(archive.hydrate(), HydrationOutcome::Missing);

        let store = ScriptedStore::new().fail_reads();
        let mut archive = RecentChats::new(Arc::new(store));
        assert!(matches!(archive.hydrate(), HydrationOutcome::Unreadable { .. }));
        assert!(archive.is_empty());
    }

    #[test]
    fn quota_failure_drops_persisted_archive_but_keeps_memory() {
        let store = Arc::new(ScriptedStore::new().fail_set_on(3, StoreFailure::Quota));
        let mut archive = RecentChats::new(store.clone());

        assert_eq!(archive.insert(entry("one")), PersistenceStatus::Saved);
        assert_eq!(archive.insert(entry("two")), PersistenceStatus::Saved);
        assert!(store.get(RECENT_CHATS_KEY).unwrap().is_some());

        assert_eq!(archive.insert(entry("three")), PersistenceStatus::QuotaExceeded);

        assert_eq!(titles(&archive), vec!["three", "two", "one"]);
        assert_eq!(store.get(RECENT_CHATS_KEY).unwrap(), None);
    }

    #[test]
    fn other_write_failures_leave_previous_snapshot() {
        let store = Arc::new(ScriptedStore::new().fail_set_on(2, StoreFailure::Io));
        let mut archive = RecentChats::new(store.clone());
        archive.insert(entry("one"));

        let status = archive.insert(entry("two"));

        assert!(matches!(status, PersistenceStatus::Degraded { .. }));
        assert_eq!(titles(&archive), vec!["two", "one"]);
        let persisted: Vec<RecentChatEntry> =
            serde_json::from_str(&store.get(RECENT_CHATS_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(persisted, vec![entry("one")]);
    }

    #[test]
    fn clear_removes_persisted_copy() {
        let store: Arc<dyn ArchiveStore> = Arc::new(MemoryStore::new());
        let mut archive = RecentChats::new(store.clone());
        archive.insert(entry("one"));

        assert_eq!(archive.clear(), PersistenceStatus::Saved);
        assert!(archive.is_empty());
        assert_eq!(store.get(RECENT_CHATS_KEY).unwrap(), None);
    }

    #[test]
    fn clear_failure_is_not_fatal() {
        let store = ScriptedStore::new().fail_removes();
        let mut archive = RecentChats::new(Arc::new(store));
        archive.insert(entry("one"));

        assert!(archive.clear().is_degraded());
        assert!(archive.is_empty());
    }
}
