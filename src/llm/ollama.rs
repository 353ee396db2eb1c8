//! Ollama chat client.
//!
//! This module implements the [`ModelClient`] trait for Ollama's
//! `/api/chat` endpoint (non-streaming), and the two read-only calls the
//! factory needs before handing a client out: the root health probe and the
//! `/api/tags` model catalog.

use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Message, ModelClient};

/// Ollama does not authenticate; the client still carries a credential slot.
pub const PLACEHOLDER_API_KEY: &str = "ollama";

/// Connection and sampling settings for an [`OllamaClient`].
#[derive(Debug, Clone)]
pub struct OllamaSettings {
    /// Normalized base URL (e.g. `http://localhost:11434`).
    pub endpoint: String,
    /// Model name as listed by the backend.
    pub model: String,
    /// Placeholder credential.
    pub api_key: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Extra generation options (e.g. `num_predict`).
    pub options: Map<String, Value>,
    /// Upper bound for a single chat request.
    pub request_timeout: Duration,
}

/// Client for the Ollama chat API.
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    settings: OllamaSettings,
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("endpoint", &self.settings.endpoint)
            .field("model", &self.settings.model)
            .field("temperature", &self.settings.temperature)
            .finish()
    }
}

impl OllamaClient {
    /// Create a new client with the given settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(settings: OllamaSettings) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self { http, settings })
    }

    fn request_body(&self, messages: &[Message]) -> Value {
        let mut options = self.settings.options.clone();
        options.insert("temperature".to_string(), json!(self.settings.temperature));

        json!({
            "model": self.settings.model,
            "messages": messages,
            "stream": false,
            "options": options,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    message: Option<ReplyMessage>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: String,
}

#[async_trait::async_trait]
impl ModelClient for OllamaClient {
    async fn invoke(&self, messages: &[Message]) -> anyhow::Result<Message> {
        let url = format!("{}/api/chat", self.settings.endpoint);
        let body = self.request_body(messages);

        tracing::debug!(
            endpoint = %self.settings.endpoint,
            model = %self.settings.model,
            message_count = messages.len(),
            "Sending chat request to Ollama"
        );

        let reply: ChatReply = self
            .http
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()?
            .json()
            .await
            .context("invalid chat response body")?;

        let content = reply
            .message
            .map(|m| m.content)
            .ok_or_else(|| anyhow::anyhow!("Invalid response format: missing message"))?;

        Ok(Message::assistant(content))
    }

    fn model_name(&self) -> &str {
        &self.settings.model
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

/// Check that the backend answers at its root URL.
///
/// Single attempt, bounded by `timeout`; non-2xx counts as a failure.
pub async fn probe(endpoint: &str, timeout: Duration) -> Result<(), reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()?
        .get(endpoint)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

/// URL of the model catalog for an endpoint.
#[must_use]
pub fn catalog_url(endpoint: &str) -> String {
    format!("{endpoint}/api/tags")
}

/// Fetch the names of all models the backend has pulled, tags included.
pub async fn list_models(endpoint: &str, timeout: Duration) -> Result<Vec<String>, reqwest::Error> {
    let tags: TagsResponse = reqwest::Client::builder()
        .timeout(timeout)
        .build()?
        .get(catalog_url(endpoint))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    Ok(tags
        .models
        .into_iter()
        .filter_map(|entry| entry.model.or(entry.name))
        .collect())
}
