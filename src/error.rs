//! Error types for the oracle service.

use thiserror::Error;

/// Errors raised by the backend factory, the chat node and the conversation flow.
#[derive(Error, Debug)]
pub enum OracleError {
    /// The requested backend interface is not registered.
    #[error("unknown backend interface '{0}' (supported: ChatOllama)")]
    UnknownBackend(String),

    /// A backend was requested without a model name.
    #[error("model name must not be empty")]
    EmptyModelName,

    /// The endpoint could not be parsed as a URL after normalization.
    #[error("invalid backend endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },

    /// The backend did not answer its health check or catalog query.
    #[error("backend at {endpoint} is unavailable: {source}")]
    BackendUnavailable {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// The backend catalog does not contain the requested model.
    #[error("model '{requested}' is not available (catalog: [{}])", .available.join(", "))]
    ModelNotFound {
        requested: String,
        available: Vec<String>,
    },

    /// The concrete client could not be constructed.
    #[error("failed to initialize backend client: {0}")]
    ClientInit(#[source] reqwest::Error),

    /// An invocation was attempted while the node holds no client.
    #[error("model '{model}' on backend '{backend}' is unavailable")]
    ModelUnavailable { model: String, backend: String },

    /// Identity or state was queried before the chat node was constructed.
    #[error("chat node not initialized")]
    NotInitialized,

    /// The model client failed while producing a response.
    #[error("model invocation failed: {0:#}")]
    Invocation(#[source] anyhow::Error),

    /// The user identifier was empty.
    #[error("user identifier must not be empty")]
    InvalidUser,

    /// The submitted message had no content.
    #[error("message must not be empty")]
    EmptyMessage,

    /// The conversation flow graph failed validation.
    #[error("invalid conversation flow: {0}")]
    InvalidFlow(String),

    /// A stage of the conversation flow failed or produced unusable output.
    #[error("conversation flow failed: {0}")]
    Flow(String),

    /// The checkpoint store could not load or persist state.
    #[error("checkpoint store error: {0:#}")]
    Checkpoint(#[source] anyhow::Error),
}

impl OracleError {
    /// Whether the error was caused by the caller's input rather than the service.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidUser | Self::EmptyMessage)
    }

    /// Whether the error means no model can currently answer.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::ModelUnavailable { .. } | Self::NotInitialized)
    }
}

/// Result type alias for oracle operations.
pub type Result<T> = std::result::Result<T, OracleError>;
