//! The operations exposed to transports.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, SessionConfig};
use crate::error::{OracleError, Result};
use crate::flow::{CompiledFlow, ConversationFlow, History};
use crate::llm::{BackendFactory, ChatNode, ChatNodeCell, Message, NodeIdentity};
use crate::session::{
    CheckpointStore, FileCheckpointStore, FixedThreadIndex, MemoryCheckpointStore,
    SessionKeyResolver, ThreadKey,
};

/// Conversation service: session keys, turns, history and model identity.
#[derive(Debug)]
pub struct OracleService {
    node: ChatNodeCell,
    flow: ConversationFlow,
    resolver: SessionKeyResolver,
    default_thread: ThreadKey,
}

impl OracleService {
    /// Build the service described by `config`.
    ///
    /// Backend failures do not fail construction: the node is left without a
    /// client and turns report [`OracleError::ModelUnavailable`].
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let factory = BackendFactory::new(config.factory_environment());
        let cell = ChatNodeCell::new();
        cell.get_or_connect(&factory, &config.descriptor()).await;

        let store = open_store(&config.sessions).await?;
        let resolver = SessionKeyResolver::new(Arc::new(FixedThreadIndex(
            config.sessions.default_thread_index,
        )));

        Self::assemble(cell, store, resolver, &config.sessions.default_user)
    }

    /// Build a service around an already constructed node.
    pub async fn with_node(
        node: ChatNode,
        store: Arc<dyn CheckpointStore>,
        resolver: SessionKeyResolver,
        default_user: &str,
    ) -> Result<Self> {
        let cell = ChatNodeCell::new();
        cell.get_or_install(node).await;
        Self::assemble(cell, store, resolver, default_user)
    }

    fn assemble(
        node: ChatNodeCell,
        store: Arc<dyn CheckpointStore>,
        resolver: SessionKeyResolver,
        default_user: &str,
    ) -> Result<Self> {
        let flow = CompiledFlow::single_inference(node.get()?)?;
        let default_thread = resolver.resolve(default_user, None)?;

        Ok(Self {
            node,
            flow: ConversationFlow::new(flow, store),
            resolver,
            default_thread,
        })
    }

    /// Thread used by callers that do not name one.
    #[must_use]
    pub fn default_thread(&self) -> &ThreadKey {
        &self.default_thread
    }

    /// Resolve the thread key for a user.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::InvalidUser`] for an empty identifier.
    pub fn initialize_session(
        &self,
        user_identifier: &str,
        thread_index: Option<u64>,
    ) -> Result<ThreadKey> {
        let key = self.resolver.resolve(user_identifier, thread_index)?;
        tracing::info!(thread_key = %key, "User logged in");
        Ok(key)
    }

    /// Run one turn and return the assistant's text.
    ///
    /// # Errors
    ///
    /// - [`OracleError::EmptyMessage`] for blank input
    /// - whatever the conversation flow reports
    pub async fn submit_turn(&self, thread_key: &ThreadKey, message_text: &str) -> Result<String> {
        if message_text.trim().is_empty() {
            return Err(OracleError::EmptyMessage);
        }

        let outcome = self
            .flow
            .run_turn(thread_key, Message::user(message_text))
            .await?;
        Ok(outcome.reply.content().to_string())
    }

    pub async fn get_history(&self, thread_key: &ThreadKey) -> Result<History> {
        self.flow.get_history(thread_key).await
    }

    pub fn get_model_identity(&self) -> Result<NodeIdentity> {
        self.node.identity()
    }

    /// Whether turns can currently reach a model.
    #[must_use]
    pub fn is_model_available(&self) -> bool {
        self.node.get().is_ok_and(|node| node.is_available())
    }

    /// Drop idle threads from memory. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        self.flow.store().sweep().await
    }
}

async fn open_store(sessions: &SessionConfig) -> Result<Arc<dyn CheckpointStore>> {
    let idle_timeout = Duration::from_secs(sessions.idle_timeout_secs);

    let store = match &sessions.checkpoint_dir {
        Some(dir) if !dir.trim().is_empty() => {
            let backing = FileCheckpointStore::open(dir).await?;
            MemoryCheckpointStore::with_backing(sessions.max_threads, idle_timeout, Arc::new(backing))
        }
        _ => MemoryCheckpointStore::new(sessions.max_threads, idle_timeout),
    };
    Ok(Arc::new(store))
}
