//! Model backends and the chat node.
//!
//! This module provides the pieces that turn a configured backend into a
//! conversational reply:
//!
//! - [`BackendFactory`]: validates a [`BackendDescriptor`] against the live
//!   backend and builds a [`ModelClient`]
//! - [`OllamaClient`]: the Ollama `/api/chat` client
//! - [`ChatNode`] / [`ChatNodeCell`]: the single model binding of the process
//!
//! # Example
//!
//! ```rust,ignore
//! use oracle_chat::llm::{BackendDescriptor, BackendFactory, ChatNodeCell, FactoryEnvironment};
//!
//! let factory = BackendFactory::new(FactoryEnvironment::from_process_env());
//! let cell = ChatNodeCell::new();
//! let node = cell.get_or_connect(&factory, &BackendDescriptor::default()).await;
//! println!("{}", node.identity().model_name);
//! ```

pub mod backend;
pub mod factory;
pub mod node;
pub mod ollama;

pub use backend::{BackendDescriptor, BackendKind, normalize_endpoint};
pub use factory::{BackendFactory, FactoryEnvironment};
pub use node::{ChatNode, ChatNodeCell, NodeIdentity};
pub use ollama::OllamaClient;

/// A message in a conversation.
///
/// Messages are immutable once created; conversations only ever append them.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    role: MessageRole,
    content: String,
}

impl Message {
    /// Create a message with an explicit role.
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    #[must_use]
    pub fn role(&self) -> MessageRole {
        self.role
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt.
    System,
    /// User message.
    User,
    /// Assistant response.
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        };
        f.write_str(name)
    }
}

/// Trait for ready-to-invoke model clients.
///
/// A client turns the full ordered history of a conversation into exactly
/// one response message.
#[async_trait::async_trait]
pub trait ModelClient: Send + Sync + std::fmt::Debug {
    /// Produce the next message for the given history.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend request fails or the reply is malformed.
    async fn invoke(&self, messages: &[Message]) -> anyhow::Result<Message>;

    /// The model this client talks to.
    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serializes_lowercase_role() {
        let msg = Message::assistant("hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }

    #[test]
    fn test_message_deserialize() {
        let msg: Message = serde_json::from_str(r#"{"role":"user","content":"hello"}"#).unwrap();
        assert_eq!(msg.role(), MessageRole::User);
        assert_eq!(msg.content(), "hello");
    }
}
