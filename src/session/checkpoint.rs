//! Conversation state and checkpoint storage.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::keys::ThreadKey;
use crate::error::Result;
use crate::llm::Message;

/// Default cap on threads held in memory.
pub const DEFAULT_MAX_THREADS: usize = 1024;

/// Default idle time after which a thread leaves memory (1 hour).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// The ordered history of one thread.
///
/// State only grows: messages are appended, never edited or reordered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append messages in order.
    pub fn append(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    #[must_use]
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

impl From<Vec<Message>> for ConversationState {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

/// Keyed, append-only storage of conversation state.
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync + std::fmt::Debug {
    /// State stored under `key`, if any.
    async fn load(&self, key: &ThreadKey) -> Result<Option<ConversationState>>;

    /// Append `messages` to the state under `key`, creating it if needed.
    async fn append(&self, key: &ThreadKey, messages: &[Message]) -> Result<()>;

    /// Store a finished turn. `history` is the whole thread after the turn and
    /// its last `added` messages are the new ones.
    async fn record_turn(&self, key: &ThreadKey, history: &[Message], added: usize) -> Result<()> {
        let start = history.len().saturating_sub(added);
        self.append(key, &history[start..]).await
    }

    /// Drop expired entries. Returns how many were removed.
    async fn sweep(&self) -> usize {
        0
    }
}

#[derive(Debug)]
struct ThreadEntry {
    state: ConversationState,
    last_activity: DateTime<Utc>,
}

impl ThreadEntry {
    fn new(state: ConversationState) -> Self {
        Self {
            state,
            last_activity: Utc::now(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    fn is_expired(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        // Negative durations mean clock skew; keep the entry.
        (now - self.last_activity)
            .to_std()
            .is_ok_and(|idle| idle > timeout)
    }
}

/// Bounded in-memory checkpoint store.
///
/// Holds at most `max_threads` threads, evicting the least recently active
/// one when full, and drops threads idle for longer than `idle_timeout` on
/// [`CheckpointStore::sweep`]. With a backing store, writes go through to it
/// and evicted threads are reloaded from it on demand; without one, eviction
/// forgets the thread.
#[derive(Debug, Clone)]
pub struct MemoryCheckpointStore {
    inner: Arc<MemoryStoreInner>,
}

#[derive(Debug)]
struct MemoryStoreInner {
    threads: RwLock<HashMap<ThreadKey, ThreadEntry>>,
    max_threads: usize,
    idle_timeout: Duration,
    backing: Option<Arc<dyn CheckpointStore>>,
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_THREADS, DEFAULT_IDLE_TIMEOUT)
    }
}

impl MemoryCheckpointStore {
    /// Create a store without persistent backing.
    #[must_use]
    pub fn new(max_threads: usize, idle_timeout: Duration) -> Self {
        Self::build(max_threads, idle_timeout, None)
    }

    /// Create a store that writes through to `backing`.
    #[must_use]
    pub fn with_backing(
        max_threads: usize,
        idle_timeout: Duration,
        backing: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self::build(max_threads, idle_timeout, Some(backing))
    }

    fn build(
        max_threads: usize,
        idle_timeout: Duration,
        backing: Option<Arc<dyn CheckpointStore>>,
    ) -> Self {
        Self {
            inner: Arc::new(MemoryStoreInner {
                threads: RwLock::new(HashMap::new()),
                max_threads: max_threads.max(1),
                idle_timeout,
                backing,
            }),
        }
    }

    /// Number of threads currently held in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .threads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, key: &ThreadKey) -> Option<ConversationState> {
        let mut guard = self
            .inner
            .threads
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guard.get_mut(key).map(|entry| {
            entry.touch();
            entry.state.clone()
        })
    }

    /// Append to a cached entry. Returns `false` when the key is not cached.
    fn append_cached(&self, key: &ThreadKey, messages: &[Message]) -> bool {
        let mut guard = self
            .inner
            .threads
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.get_mut(key) {
            Some(entry) => {
                entry.state.append(messages.iter().cloned());
                entry.touch();
                true
            }
            None => false,
        }
    }

    fn insert(&self, key: ThreadKey, state: ConversationState) {
        let mut guard = self
            .inner
            .threads
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if !guard.contains_key(&key) && guard.len() >= self.inner.max_threads {
            let oldest = guard
                .iter()
                .min_by_key(|(_, entry)| entry.last_activity)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                guard.remove(&oldest);
                tracing::debug!(thread_key = %oldest, "Evicted least recently active thread");
            }
        }

        guard.insert(key, ThreadEntry::new(state));
    }
}

#[async_trait::async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, key: &ThreadKey) -> Result<Option<ConversationState>> {
        if let Some(state) = self.cached(key) {
            return Ok(Some(state));
        }

        let Some(backing) = &self.inner.backing else {
            return Ok(None);
        };

        let loaded = backing.load(key).await?;
        if let Some(state) = &loaded {
            tracing::debug!(thread_key = %key, message_count = state.len(), "Reloaded thread from backing store");
            self.insert(key.clone(), state.clone());
        }
        Ok(loaded)
    }

    async fn append(&self, key: &ThreadKey, messages: &[Message]) -> Result<()> {
        if let Some(backing) = &self.inner.backing {
            backing.append(key, messages).await?;
            if !self.append_cached(key, messages) {
                let state = backing.load(key).await?.unwrap_or_default();
                self.insert(key.clone(), state);
            }
            return Ok(());
        }

        if !self.append_cached(key, messages) {
            self.insert(key.clone(), ConversationState::from(messages.to_vec()));
        }
        Ok(())
    }

    async fn record_turn(&self, key: &ThreadKey, history: &[Message], added: usize) -> Result<()> {
        let start = history.len().saturating_sub(added);
        if self.inner.backing.is_some() {
            return self.append(key, &history[start..]).await;
        }

        // Evicted mid-turn: the caller's history is the only complete copy left.
        if !self.append_cached(key, &history[start..]) {
            tracing::debug!(thread_key = %key, message_count = history.len(), "Restoring thread evicted during its turn");
            self.insert(key.clone(), ConversationState::from(history.to_vec()));
        }
        Ok(())
    }

    async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut guard = self
            .inner
            .threads
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = guard.len();
        guard.retain(|_, entry| !entry.is_expired(self.inner.idle_timeout, now));
        before - guard.len()
    }
}
