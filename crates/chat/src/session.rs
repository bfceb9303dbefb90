//! Conversation session: live transcript, single-flight remote exchanges, and
//! the recent-chat archive.
//!
//! Operations take `&self` and may be polled concurrently on one task. The
//! only suspension points are the remote calls; state is mutated only in the
//! synchronous sections around them, under a mutex that is never held across
//! an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aiko_assistant::{AssistantClient, ImageRef};
use aiko_storage::ArchiveStore;
use arc_swap::{ArcSwap, ArcSwapOption};
use snafu::{Snafu, ensure};

use crate::archive::{HydrationOutcome, PersistenceStatus, RecentChatEntry, RecentChats};
use crate::chat::{
    ExchangeKind, ExchangeState, ExchangeTransition, Message, PendingExchange, Transcript,
};

/// Shown when a send fails without a server-supplied explanation.
pub const SEND_FAILURE_FALLBACK: &str = "Sorry, something went wrong. Please try again.";

/// Shown when a reset fails without a server-supplied explanation.
pub const RESET_FAILURE_FALLBACK: &str = "Failed to reset the conversation. Please try again.";

/// Starter prompts offered before the first exchange.
pub const DEFAULT_SUGGESTIONS: [&str; 4] = [
    "Tell me about the Asset Reconstruction value chain.",
    "What are some AI use cases in manufacturing?",
    "How can AI improve customer service?",
    "Show me AI use cases for Retail.",
];

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("session is busy ({active:?}); operation `{stage}` rejected"))]
    Busy {
        stage: &'static str,
        active: ExchangeState,
    },
    #[snafu(display("cannot send an empty message"))]
    EmptyMessage { stage: &'static str },
}

pub type SessionResult<T> = Result<T, SessionError>;

/// How an accepted operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Completed { persistence: PersistenceStatus },
    /// The remote call failed; `message` was appended to the transcript.
    RemoteFailed { message: String },
}

struct SessionInner {
    transcript: Transcript,
    state: ExchangeState,
    last_error: Option<String>,
    archive: RecentChats,
}

pub struct Session {
    client: Arc<dyn AssistantClient>,
    inner: Mutex<SessionInner>,
    image: ArcSwapOption<ImageRef>,
    suggestions: ArcSwap<Vec<String>>,
}

/// Returns the session to `Idle` when dropped, whether the remote call
/// resolved, failed, or its future was dropped mid-flight.
struct ExchangeGuard<'a> {
    session: &'a Session,
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.session.lock();
        match inner.state.apply(ExchangeTransition::Settle) {
            Ok(next) => inner.state = next,
            Err(rejection) => {
                tracing::error!(?rejection, "exchange guard released an idle session");
            }
        }
    }
}

impl Session {
    /// Creates a session with the default transcript and an empty archive.
    pub fn create(client: Arc<dyn AssistantClient>, store: Arc<dyn ArchiveStore>) -> Self {
        Self {
            client,
            inner: Mutex::new(SessionInner {
                transcript: Transcript::default(),
                state: ExchangeState::Idle,
                last_error: None,
                archive: RecentChats::new(store),
            }),
            image: ArcSwapOption::empty(),
            suggestions: ArcSwap::from_pointee(
                DEFAULT_SUGGESTIONS
                    .iter()
                    .map(|prompt| prompt.to_string())
                    .collect::<Vec<_>>(),
            ),
        }
    }

    /// Loads the persisted archive, replacing the in-memory one.
    pub fn hydrate(&self) -> HydrationOutcome {
        let outcome = self.lock().archive.hydrate();
        match &outcome {
            HydrationOutcome::Restored { count, truncated } => {
                tracing::info!(count, truncated, "restored recent chats");
            }
            HydrationOutcome::Missing => tracing::info!("no persisted recent chats"),
            HydrationOutcome::Unreadable { .. } | HydrationOutcome::Malformed { .. } => {}
        }
        outcome
    }

    /// Ends the session. The archive is written through on every change, so
    /// nothing is flushed here.
    pub fn dispose(self) {
        let inner = self.lock();
        tracing::info!(
            transcript_len = inner.transcript.len(),
            recent_chats = inner.archive.len(),
            "session disposed"
        );
    }

    /// Sends one utterance and records the exchange.
    ///
    /// Rejected with [`SessionError::Busy`] while another exchange is in flight.
    pub async fn send(&self, text: &str) -> SessionResult<ExchangeOutcome> {
        ensure!(!text.trim().is_empty(), EmptyMessageSnafu { stage: "send" });

        let user_message = Message::user(text);
        let _guard = self.begin_exchange(ExchangeKind::Send, "send", |inner| {
            inner.transcript.push(user_message.clone());
        })?;

        match self.client.send_message(text).await {
            Ok(reply) => {
                let assistant_message = Message::assistant(reply.response);
                self.image.store(reply.image.map(Arc::new));

                let entry = RecentChatEntry::from_exchange(user_message, assistant_message.clone());
                let persistence = {
                    let mut inner = self.lock();
                    inner.transcript.push(assistant_message);
                    inner.archive.insert(entry)
                };
                if persistence.is_degraded() {
                    tracing::warn!(?persistence, "exchange recorded in memory only");
                }
                Ok(ExchangeOutcome::Completed { persistence })
            }
            Err(error) => {
                tracing::warn!(error = %error, "assistant send failed");
                let message = error
                    .server_message()
                    .unwrap_or(SEND_FAILURE_FALLBACK)
                    .to_string();
                Ok(self.record_remote_failure(message))
            }
        }
    }

    /// Asks the backend to forget the conversation and, on success, resets
    /// the transcript, clears the archive, and drops the image.
    ///
    /// A failed reset leaves the archive and image alone.
    pub async fn new_session(&self) -> SessionResult<ExchangeOutcome> {
        let _guard = self.begin_exchange(ExchangeKind::Reset, "new-session", |_| {})?;

        match self.client.reset_conversation().await {
            Ok(()) => {
                self.image.store(None);
                let persistence = {
                    let mut inner = self.lock();
                    inner.transcript = Transcript::default();
                    inner.archive.clear()
                };
                tracing::info!(?persistence, "conversation reset");
                Ok(ExchangeOutcome::Completed { persistence })
            }
            Err(error) => {
                tracing::warn!(error = %error, "assistant reset failed");
                let message = error
                    .server_message()
                    .unwrap_or(RESET_FAILURE_FALLBACK)
                    .to_string();
                Ok(self.record_remote_failure(message))
            }
        }
    }

    /// Sends a suggested prompt and refreshes the suggestion set alongside it.
    ///
    /// The refresh is best-effort; its failure never changes the send outcome.
    pub async fn select_suggestion(&self, text: &str) -> SessionResult<ExchangeOutcome> {
        let (outcome, ()) = futures::join!(self.send(text), self.refresh_suggestions(text));
        outcome
    }

    /// Shows an archived exchange in place of the live transcript.
    ///
    /// Allowed in any state; the archive, exchange status, and image are untouched.
    pub fn select_archived_chat(&self, entry: &RecentChatEntry) {
        self.lock().transcript = Transcript::from(entry.messages().to_vec());
    }

    pub fn transcript(&self) -> Transcript {
        self.lock().transcript.clone()
    }

    pub fn state(&self) -> ExchangeState {
        self.lock().state
    }

    pub fn pending(&self) -> PendingExchange {
        let inner = self.lock();
        PendingExchange {
            in_flight: !inner.state.is_idle(),
            last_error: inner.last_error.clone(),
        }
    }

    pub fn recent_chats(&self) -> Vec<RecentChatEntry> {
        self.lock().archive.list().to_vec()
    }

    pub fn image(&self) -> Option<Arc<ImageRef>> {
        self.image.load_full()
    }

    pub fn suggestions(&self) -> Arc<Vec<String>> {
        self.suggestions.load_full()
    }

    async fn refresh_suggestions(&self, text: &str) {
        match self.client.fetch_suggestions(text).await {
            Ok(suggestions) => {
                tracing::debug!(count = suggestions.len(), "suggestions refreshed");
                self.suggestions.store(Arc::new(suggestions));
            }
            Err(error) => {
                tracing::warn!(error = %error, "failed to refresh suggestions");
            }
        }
    }

    /// Claims the exchange slot and applies `on_accept` in the same critical
    /// section, so a rejected call leaves no trace.
    fn begin_exchange(
        &self,
        kind: ExchangeKind,
        stage: &'static str,
        on_accept: impl FnOnce(&mut SessionInner),
    ) -> SessionResult<ExchangeGuard<'_>> {
        let mut inner = self.lock();
        match inner.state.apply(ExchangeTransition::Begin(kind)) {
            Ok(next) => {
                inner.state = next;
                inner.last_error = None;
                on_accept(&mut *inner);
                Ok(ExchangeGuard { session: self })
            }
            Err(rejection) => {
                tracing::debug!(?kind, ?rejection, "exchange rejected");
                BusySnafu {
                    stage,
                    active: inner.state,
                }
                .fail()
            }
        }
    }

    fn record_remote_failure(&self, message: String) -> ExchangeOutcome {
        let mut inner = self.lock();
        inner.transcript.push(Message::assistant(message.clone()));
        inner.last_error = Some(message.clone());
        ExchangeOutcome::RemoteFailed { message }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
