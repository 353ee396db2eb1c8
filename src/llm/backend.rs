//! Backend kinds, descriptors and endpoint handling.
//!
//! This module handles the differences between model backends: how an
//! interface identifier maps to a backend, which port it listens on by
//! default, and how user-supplied endpoints are normalized.

use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::OracleError;

/// Scheme prepended to endpoints given without one.
pub const DEFAULT_SCHEME: &str = "http";

/// Supported model backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Ollama (`/api/chat`, `/api/tags`)
    Ollama,
}

impl BackendKind {
    /// Canonical interface identifier, as reported in node identity.
    #[must_use]
    pub fn interface_name(self) -> &'static str {
        match self {
            Self::Ollama => "ChatOllama",
        }
    }

    /// Port the backend listens on when installed with its defaults.
    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Self::Ollama => 11434,
        }
    }

    /// Endpoint used when neither the descriptor nor the environment names one.
    #[must_use]
    pub fn default_endpoint(self) -> String {
        format!("{DEFAULT_SCHEME}://localhost:{}", self.default_port())
    }
}

impl FromStr for BackendKind {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chatollama" | "ollama" => Ok(Self::Ollama),
            _ => Err(OracleError::UnknownBackend(s.to_string())),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.interface_name())
    }
}

/// Everything needed to build a model client.
///
/// Built once at startup from configuration and never changed afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendDescriptor {
    /// Backend interface identifier (e.g. `ChatOllama`).
    pub interface: String,
    /// Model name as known to the backend.
    pub model_name: String,
    /// Explicit endpoint; falls back to the environment, then the backend default.
    pub endpoint: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Backend-specific options passed through untouched (e.g. `num_predict`).
    pub options: Map<String, Value>,
}

impl Default for BackendDescriptor {
    fn default() -> Self {
        let mut options = Map::new();
        options.insert("num_predict".to_string(), Value::from(1500));
        Self {
            interface: BackendKind::Ollama.interface_name().to_string(),
            model_name: "mistral_nemo_conservative".to_string(),
            endpoint: None,
            temperature: 0.5,
            options,
        }
    }
}

/// Normalize a user-supplied endpoint.
///
/// Surrounding whitespace and trailing slashes are removed, and
/// `http://` is prepended when no scheme is present.
///
/// # Example
///
/// ```rust
/// use oracle_chat::llm::normalize_endpoint;
///
/// assert_eq!(normalize_endpoint("example.com:11434"), "http://example.com:11434");
/// assert_eq!(normalize_endpoint("https://gpu-box/"), "https://gpu-box");
/// ```
#[must_use]
pub fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("{DEFAULT_SCHEME}://{trimmed}")
    }
}

/// Pick the effective endpoint: explicit, then environment, then the backend default.
#[must_use]
pub fn resolve_endpoint(
    kind: BackendKind,
    explicit: Option<&str>,
    environment: Option<&str>,
) -> String {
    explicit
        .filter(|e| !e.trim().is_empty())
        .or_else(|| environment.filter(|e| !e.trim().is_empty()))
        .map_or_else(|| kind.default_endpoint(), normalize_endpoint)
}

/// Strip the tag suffix from a model name (`llama3:8b` -> `llama3`).
#[must_use]
pub fn base_model_name(name: &str) -> &str {
    name.split(':').next().unwrap_or(name)
}
