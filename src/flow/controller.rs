//! Turn execution over a compiled flow and a checkpoint store.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::instrument;
use uuid::Uuid;

use super::CompiledFlow;
use crate::error::{OracleError, Result};
use crate::llm::{Message, MessageRole};
use crate::session::{CheckpointStore, ConversationState, ThreadKey};

/// Result of one conversational turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnOutcome {
    /// The assistant reply produced by the turn.
    pub reply: Message,
    /// The thread's full history after the turn.
    pub messages: Vec<Message>,
}

/// Stored history of a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum History {
    /// The thread has never completed a turn.
    NoPriorConversation,
    Messages(Vec<Message>),
}

impl History {
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        match self {
            Self::NoPriorConversation => &[],
            Self::Messages(messages) => messages,
        }
    }
}

/// Runs turns for many threads, one at a time per thread.
#[derive(Debug)]
pub struct ConversationFlow {
    flow: CompiledFlow,
    store: Arc<dyn CheckpointStore>,
    turn_locks: TurnLocks,
}

impl ConversationFlow {
    #[must_use]
    pub fn new(flow: CompiledFlow, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            flow,
            store,
            turn_locks: TurnLocks::default(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Run one turn on `thread_key`.
    ///
    /// Turns on the same key queue behind each other. The user message and
    /// the reply are persisted together, and only once the flow succeeds.
    ///
    /// # Errors
    ///
    /// - Any error raised by a stage (e.g. [`OracleError::ModelUnavailable`])
    /// - [`OracleError::Flow`] when no stage produced an assistant message
    /// - [`OracleError::Checkpoint`] when the store fails
    #[instrument(
        skip(self, thread_key, user_message),
        fields(thread_key = %thread_key, request_id = tracing::field::Empty)
    )]
    pub async fn run_turn(&self, thread_key: &ThreadKey, user_message: Message) -> Result<TurnOutcome> {
        let request_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("request_id", &request_id);

        let _turn = self.turn_locks.acquire(thread_key).await;

        let mut messages = self
            .store
            .load(thread_key)
            .await?
            .map(ConversationState::into_messages)
            .unwrap_or_default();
        messages.push(user_message);

        let produced = self.flow.execute(&messages).await?;
        let reply = produced
            .into_iter()
            .rev()
            .find(|m| m.role() == MessageRole::Assistant)
            .ok_or_else(|| OracleError::Flow("flow produced no assistant message".to_string()))?;

        messages.push(reply.clone());
        self.store.record_turn(thread_key, &messages, 2).await?;

        tracing::info!(message_count = messages.len(), "Turn completed");
        Ok(TurnOutcome { reply, messages })
    }

    /// Stored history of `thread_key`. Unknown keys are not an error.
    pub async fn get_history(&self, thread_key: &ThreadKey) -> Result<History> {
        let history = match self.store.load(thread_key).await? {
            Some(state) if !state.is_empty() => History::Messages(state.into_messages()),
            _ => History::NoPriorConversation,
        };
        Ok(history)
    }
}

/// Per-key turn locks. Entries are dropped once no turn holds or awaits them.
#[derive(Debug, Default)]
struct TurnLocks {
    locks: std::sync::Mutex<HashMap<ThreadKey, LockEntry>>,
}

#[derive(Debug, Default)]
struct LockEntry {
    lock: Arc<Mutex<()>>,
    // Turns holding or waiting on `lock`.
    users: usize,
}

impl TurnLocks {
    async fn acquire(&self, key: &ThreadKey) -> TurnGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = locks.entry(key.clone()).or_default();
            entry.users += 1;
            Arc::clone(&entry.lock)
        };
        // Registered before waiting, so a cancelled waiter still unregisters.
        let mut turn = TurnGuard {
            locks: self,
            key: key.clone(),
            guard: None,
        };
        turn.guard = Some(lock.lock_owned().await);
        turn
    }

    fn release(&self, key: &ThreadKey) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = locks.get_mut(key) {
            entry.users = entry.users.saturating_sub(1);
            if entry.users == 0 {
                locks.remove(key);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct TurnGuard<'a> {
    locks: &'a TurnLocks,
    key: ThreadKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.release(&self.key);
    }
}
