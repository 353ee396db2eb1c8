//! The chat node: one model binding per process.
//!
//! A [`ChatNode`] pairs the model client produced by the
//! [`BackendFactory`] with the identity of the backend that answers. The
//! process holds exactly one node, stored in a [`ChatNodeCell`] that is
//! created at startup and shared by handle; the first construction wins and
//! later construction requests return the same node.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;

use super::backend::BackendDescriptor;
use super::factory::BackendFactory;
use super::{Message, ModelClient};
use crate::error::{OracleError, Result};

/// Which backend and model answer conversations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeIdentity {
    pub model_name: String,
    pub backend_kind: String,
}

/// Produces assistant messages from conversation history.
#[derive(Debug)]
pub struct ChatNode {
    identity: NodeIdentity,
    client: Option<Arc<dyn ModelClient>>,
}

impl ChatNode {
    /// Build a node from a descriptor, asking the factory for a client.
    ///
    /// Factory failures are logged and leave the node without a client;
    /// every later [`ChatNode::get_response`] then fails fast.
    pub async fn connect(factory: &BackendFactory, descriptor: &BackendDescriptor) -> Self {
        let endpoint = factory
            .effective_endpoint(descriptor)
            .unwrap_or_else(|_| descriptor.endpoint.clone().unwrap_or_default());

        let client = match factory.create_client(descriptor).await {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(
                    backend = %descriptor.interface,
                    model = %descriptor.model_name,
                    endpoint = %endpoint,
                    error = %e,
                    "Could not instantiate the model interface"
                );
                None
            }
        };

        if client.is_some() {
            tracing::info!(
                backend = %descriptor.interface,
                model = %descriptor.model_name,
                endpoint = %endpoint,
                temperature = descriptor.temperature,
                "Chat node connected"
            );
        }

        Self::with_client(descriptor, client)
    }

    /// Build a node around an already constructed client.
    #[must_use]
    pub fn with_client(descriptor: &BackendDescriptor, client: Option<Arc<dyn ModelClient>>) -> Self {
        Self {
            identity: NodeIdentity {
                model_name: descriptor.model_name.clone(),
                backend_kind: descriptor.interface.clone(),
            },
            client,
        }
    }

    #[must_use]
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Whether a live client is attached.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.client.is_some()
    }

    /// Produce the next assistant message for `messages`.
    ///
    /// # Errors
    ///
    /// - [`OracleError::ModelUnavailable`] when no client is attached
    /// - [`OracleError::Invocation`] when the client fails
    pub async fn get_response(&self, messages: &[Message]) -> Result<Message> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| OracleError::ModelUnavailable {
                model: self.identity.model_name.clone(),
                backend: self.identity.backend_kind.clone(),
            })?;

        let reply = client
            .invoke(messages)
            .await
            .map_err(OracleError::Invocation)?;

        Ok(Message::assistant(reply.content()))
    }
}

/// Write-once holder for the process's chat node.
#[derive(Debug, Default)]
pub struct ChatNodeCell {
    node: OnceCell<Arc<ChatNode>>,
}

impl ChatNodeCell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the node, connecting it on first use.
    ///
    /// Arguments of every call after the first are ignored.
    pub async fn get_or_connect(
        &self,
        factory: &BackendFactory,
        descriptor: &BackendDescriptor,
    ) -> Arc<ChatNode> {
        let node = self
            .node
            .get_or_init(|| async { Arc::new(ChatNode::connect(factory, descriptor).await) })
            .await;
        Arc::clone(node)
    }

    /// Return the node, installing `node` if none exists yet.
    pub async fn get_or_install(&self, node: ChatNode) -> Arc<ChatNode> {
        let node = self.node.get_or_init(|| async move { Arc::new(node) }).await;
        Arc::clone(node)
    }

    /// The node, if constructed.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::NotInitialized`] before the first construction.
    pub fn get(&self) -> Result<Arc<ChatNode>> {
        self.node.get().map(Arc::clone).ok_or(OracleError::NotInitialized)
    }

    /// Identity of the constructed node.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::NotInitialized`] before the first construction.
    pub fn identity(&self) -> Result<NodeIdentity> {
        self.get().map(|node| node.identity().clone())
    }
}
