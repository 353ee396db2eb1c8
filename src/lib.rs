//! Oracle Chat
//!
//! A conversational service that binds one locally hosted language model to
//! many independent, persistent conversation threads.
//!
//! # Architecture
//!
//! - **Backend factory**: validates the configured backend (health probe and
//!   model catalog) and builds the model client
//! - **Chat node**: the single model binding of the process
//! - **Conversation flow**: a `START -> infer -> END` graph run once per turn,
//!   serialized per thread and checkpointed after each turn
//! - **Server**: Axum HTTP API over the service
//!
//! # Modules
//!
//! - [`config`]: layered configuration (defaults, file, environment, CLI)
//! - [`llm`]: backends, the Ollama client and the chat node
//! - [`flow`]: flow graph and turn controller
//! - [`session`]: thread keys and checkpoint stores
//! - [`service`]: the operations exposed to transports
//! - [`server`]: HTTP routes

#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod error;
pub mod flow;
pub mod llm;
pub mod server;
pub mod service;
pub mod session;
pub mod telemetry;

use crate::config::AppConfig;
use crate::service::OracleService;
use std::sync::Arc;

pub use error::{OracleError, Result};

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Conversation service.
    pub service: Arc<OracleService>,
    /// Loaded configuration.
    pub config: Arc<AppConfig>,
}
