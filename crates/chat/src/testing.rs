//! Scripted collaborators shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use aiko_assistant::{AssistantClient, BoxFuture, ChatReply, RemoteError, RemoteResult};
use aiko_storage::{ArchiveStore, MemoryStore, StorageError, StorageResult};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy)]
pub enum StoreFailure {
    Quota,
    Io,
}

impl StoreFailure {
    fn into_error(self, key: &str) -> StorageError {
        match self {
            Self::Quota => StorageError::QuotaExceeded {
                stage: "scripted-store-set",
                key: key.to_string(),
                required_bytes: u64::MAX,
                quota_bytes: 0,
            },
            Self::Io => StorageError::InvariantViolation {
                stage: "scripted-store-set",
                details: "scripted write failure".to_string(),
            },
        }
    }
}

/// Memory store that fails chosen calls.
#[derive(Default)]
pub struct ScriptedStore {
    inner: MemoryStore,
    set_calls: AtomicUsize,
    set_failures: HashMap<usize, StoreFailure>,
    fail_reads: bool,
    fail_removes: bool,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the `call`-th `set` (1-based).
    pub fn fail_set_on(mut self, call: usize, failure: StoreFailure) -> Self {
        self.set_failures.insert(call, failure);
        self
    }

    pub fn fail_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn fail_removes(mut self) -> Self {
        self.fail_removes = true;
        self
    }
}

impl ArchiveStore for ScriptedStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        if self.fail_reads {
            return Err(StorageError::InvariantViolation {
                stage: "scripted-store-get",
                details: "scripted read failure".to_string(),
            });
        }
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let call = self.set_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(failure) = self.set_failures.get(&call) {
            return Err(failure.into_error(key));
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        if self.fail_removes {
            return Err(StorageError::InvariantViolation {
                stage: "scripted-store-remove",
                details: "scripted remove failure".to_string(),
            });
        }
        self.inner.remove(key)
    }
}

pub fn remote_failure(message: Option<&str>) -> RemoteError {
    RemoteError::Status {
        stage: "scripted-client",
        status: 500,
        message: message.map(str::to_string),
    }
}

/// Assistant client replaying queued results.
///
/// Empty queues answer with a plain "ok" reply, a successful reset, and a
/// failed suggestion refresh.
#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<RemoteResult<ChatReply>>>,
    resets: Mutex<VecDeque<RemoteResult<()>>>,
    suggestions: Mutex<VecDeque<RemoteResult<Vec<String>>>>,
    gate: Option<Arc<Notify>>,
    send_calls: AtomicUsize,
    reset_calls: AtomicUsize,
    suggestion_calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Holds every send/reset call open until the gate is notified once per call.
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn reply(self, result: RemoteResult<ChatReply>) -> Self {
        self.replies
            .lock()
            .expect("scripted replies lock")
            .push_back(result);
        self
    }

    pub fn reset(self, result: RemoteResult<()>) -> Self {
        self.resets
            .lock()
            .expect("scripted resets lock")
            .push_back(result);
        self
    }

    pub fn suggestions(self, result: RemoteResult<Vec<String>>) -> Self {
        self.suggestions
            .lock()
            .expect("scripted suggestions lock")
            .push_back(result);
        self
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) -> usize {
        self.reset_calls.load(Ordering::SeqCst)
    }

    pub fn suggestion_calls(&self) -> usize {
        self.suggestion_calls.load(Ordering::SeqCst)
    }

    async fn wait_for_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
    }
}

impl AssistantClient for ScriptedClient {
    fn send_message<'a>(&'a self, _text: &'a str) -> BoxFuture<'a, RemoteResult<ChatReply>> {
        Box::pin(async move {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            self.wait_for_gate().await;
            self.replies
                .lock()
                .expect("scripted replies lock")
                .pop_front()
                .unwrap_or_else(|| Ok(ChatReply::text("ok")))
        })
    }

    fn reset_conversation<'a>(&'a self) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            self.reset_calls.fetch_add(1, Ordering::SeqCst);
            self.wait_for_gate().await;
            self.resets
                .lock()
                .expect("scripted resets lock")
                .pop_front()
                .unwrap_or(Ok(()))
        })
    }

    fn fetch_suggestions<'a>(&'a self, _text: &'a str) -> BoxFuture<'a, RemoteResult<Vec<String>>> {
        Box::pin(async move {
            self.suggestion_calls.fetch_add(1, Ordering::SeqCst);
            self.suggestions
                .lock()
                .expect("scripted suggestions lock")
                .pop_front()
                .unwrap_or_else(|| Err(remote_failure(None)))
        })
    }
}
