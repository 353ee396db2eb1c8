use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Query, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tracing::info;

use crate::AppState;
use crate::config::{AppConfig, ServerConfig};
use crate::error::OracleError;
use crate::flow::History;
use crate::llm::{Message, NodeIdentity};
use crate::service::OracleService;
use crate::session::ThreadKey;

/// Reply given when a thread has no history yet.
pub const NO_PRIOR_CONVERSATION: &str = "I'm sorry, but I don't remember a previous conversation.";

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>, service: Arc<OracleService>) -> anyhow::Result<()> {
    match service.get_model_identity() {
        Ok(identity) => info!(
            name: "backend.selected",
            model = %identity.model_name,
            backend = %identity.backend_kind,
            available = service.is_model_available(),
            "Chat node ready"
        ),
        Err(e) => tracing::warn!(error = %e, "Chat node not initialized"),
    }

    let sweeper = spawn_sweeper(
        Arc::clone(&service),
        Duration::from_secs(config.sessions.sweep_interval_secs),
    );

    let state = AppState {
        service,
        config: Arc::clone(&config),
    };
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

/// Build the router with all routes and layers.
pub fn router(state: AppState) -> Router {
    let timeout_duration = match state.config.server.request_timeout_secs {
        // Zero disables the timeout; a year is effectively forever.
        0 => Duration::from_secs(365 * 24 * 60 * 60),
        secs => Duration::from_secs(secs),
    };
    let cors = cors_layer(&state.config.server);

    Router::new()
        .route("/initialize", post(initialize))
        .route("/chat", post(chat))
        .route("/get_conversation", get(get_conversation))
        .route("/model", get(model))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout_duration, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response(),
                }
            },
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if server.cors_origins.iter().any(|o| o.trim() == "*") {
        return base.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    base.allow_origin(origins)
}

fn spawn_sweeper(service: Arc<OracleService>, every: Duration) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = service.sweep().await;
            if removed > 0 {
                tracing::debug!(removed, "Idle threads swept");
            }
        }
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Service error rendered as `{"detail": "..."}`.
#[derive(Debug)]
pub struct ApiError(OracleError);

impl From<OracleError> for ApiError {
    fn from(err: OracleError) -> Self {
        Self(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else if self.0.is_unavailable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, status = status.as_u16(), "Request failed");
        }

        (
            status,
            Json(ErrorBody {
                detail: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct InitializeQuery {
    #[serde(default)]
    user_identifier: String,
    #[serde(default)]
    thread_index: Option<u64>,
}

#[derive(Debug, Serialize)]
struct InitializeResponse {
    success: String,
    thread_key: ThreadKey,
}

/// POST /initialize - Resolve the thread key for a user.
async fn initialize(
    State(state): State<AppState>,
    Query(query): Query<InitializeQuery>,
) -> Result<Json<InitializeResponse>, ApiError> {
    let thread_key = state
        .service
        .initialize_session(&query.user_identifier, query.thread_index)?;

    Ok(Json(InitializeResponse {
        success: format!("User {} logged in!", query.user_identifier.trim()),
        thread_key,
    }))
}

/// Request body for the chat API.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    /// User message content.
    message: String,
    /// Thread to continue; the default user's thread when absent.
    #[serde(default)]
    thread_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    responses: String,
    thread_key: ThreadKey,
}

/// POST /chat - Run one turn.
async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let thread_key = resolve_thread(&state, req.thread_key);
    tracing::debug!(thread_key = %thread_key, "Received chat request");

    let responses = state.service.submit_turn(&thread_key, &req.message).await?;
    Ok(Json(ChatResponse {
        responses,
        thread_key,
    }))
}

#[derive(Debug, Deserialize)]
struct ConversationQuery {
    #[serde(default)]
    thread_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConversationResponse {
    messages: Vec<Message>,
}

/// GET /get_conversation - Stored history of a thread.
async fn get_conversation(
    State(state): State<AppState>,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let thread_key = resolve_thread(&state, query.thread_key);

    let messages = match state.service.get_history(&thread_key).await? {
        History::NoPriorConversation => vec![Message::assistant(NO_PRIOR_CONVERSATION)],
        History::Messages(messages) => messages,
    };
    Ok(Json(ConversationResponse { messages }))
}

/// GET /model - Identity of the serving model.
async fn model(State(state): State<AppState>) -> Result<Json<NodeIdentity>, ApiError> {
    Ok(Json(state.service.get_model_identity()?))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    model_available: bool,
}

/// GET /health - Liveness.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model_available: state.service.is_model_available(),
    })
}

fn resolve_thread(state: &AppState, requested: Option<String>) -> ThreadKey {
    requested
        .filter(|key| !key.trim().is_empty())
        .map_or_else(|| state.service.default_thread().clone(), ThreadKey::from)
}
