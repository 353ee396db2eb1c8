use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum_test::TestServer;
use oracle_chat::AppState;
use oracle_chat::config::AppConfig;
use oracle_chat::llm::{BackendDescriptor, ChatNode, Message, ModelClient};
use oracle_chat::server::{NO_PRIOR_CONVERSATION, router};
use oracle_chat::service::OracleService;
use oracle_chat::session::{MemoryCheckpointStore, SessionKeyResolver};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

/// Answers with the number of messages it was shown.
#[derive(Debug)]
struct Counting;

#[async_trait::async_trait]
impl ModelClient for Counting {
    async fn invoke(&self, messages: &[Message]) -> anyhow::Result<Message> {
        Ok(Message::assistant(format!("seen {}", messages.len())))
    }

    fn model_name(&self) -> &str {
        "counting"
    }
}

async fn app(client: Option<Arc<dyn ModelClient>>) -> axum::Router {
    let config = Arc::new(AppConfig::load_from_args(["oracle-chat"]).unwrap());
    let node = ChatNode::with_client(&BackendDescriptor::default(), client);
    let service = OracleService::with_node(
        node,
        Arc::new(MemoryCheckpointStore::default()),
        SessionKeyResolver::default(),
        &config.sessions.default_user,
    )
    .await
    .unwrap();

    router(AppState {
        service: Arc::new(service),
        config,
    })
}

async fn server(client: Option<Arc<dyn ModelClient>>) -> TestServer {
    TestServer::new(app(client).await).unwrap()
}

#[tokio::test]
async fn test_initialize_chat_and_history() {
    let server = server(Some(Arc::new(Counting))).await;

    let response = server
        .post("/initialize")
        .add_query_param("user_identifier", "alice")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["success"], "User alice logged in!");
    assert_eq!(body["thread_key"], "alice_42");

    for expected in ["seen 1", "seen 3"] {
        let response = server
            .post("/chat")
            .json(&json!({ "message": "hello", "thread_key": "alice_42" }))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["responses"], expected);
        assert_eq!(body["thread_key"], "alice_42");
    }

    let response = server
        .get("/get_conversation")
        .add_query_param("thread_key", "alice_42")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(
        body["messages"],
        json!([
            { "role": "user", "content": "hello" },
            { "role": "assistant", "content": "seen 1" },
            { "role": "user", "content": "hello" },
            { "role": "assistant", "content": "seen 3" },
        ])
    );
}

#[tokio::test]
async fn test_default_thread_when_key_omitted() {
    let server = server(Some(Arc::new(Counting))).await;

    let response = server.post("/chat").json(&json!({ "message": "hi" })).await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["thread_key"], "default_42");

    let body: Value = server.get("/get_conversation").await.json();
    assert_eq!(body["messages"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_empty_history_apologizes() {
    let server = server(Some(Arc::new(Counting))).await;

    let response = server
        .get("/get_conversation")
        .add_query_param("thread_key", "stranger_1")
        .await;
    response.assert_status_ok();
    assert_eq!(
        response.json::<Value>()["messages"],
        json!([{ "role": "assistant", "content": NO_PRIOR_CONVERSATION }])
    );
}

#[tokio::test]
async fn test_invalid_input_is_bad_request() {
    let server = server(Some(Arc::new(Counting))).await;

    let response = server
        .post("/initialize")
        .add_query_param("user_identifier", "  ")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.json::<Value>()["detail"].is_string());

    let response = server.post("/chat").json(&json!({ "message": "" })).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["detail"], "message must not be empty");
}

#[tokio::test]
async fn test_missing_client_is_service_unavailable() {
    let server = server(None).await;

    let response = server.post("/chat").json(&json!({ "message": "hi" })).await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let detail = response.json::<Value>()["detail"].as_str().unwrap().to_string();
    assert!(detail.contains("mistral_nemo_conservative"), "{detail}");

    // The failed turn left nothing behind.
    let body: Value = server.get("/get_conversation").await.json();
    assert_eq!(body["messages"][0]["content"], NO_PRIOR_CONVERSATION);

    let health: Value = server.get("/health").await.json();
    assert_eq!(health, json!({ "status": "ok", "model_available": false }));
}

#[tokio::test]
async fn test_model_identity() {
    let server = server(Some(Arc::new(Counting))).await;

    let body: Value = server.get("/model").await.json();
    assert_eq!(
        body,
        json!({ "model_name": "mistral_nemo_conservative", "backend_kind": "ChatOllama" })
    );
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let app = app(Some(Arc::new(Counting))).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("origin", "http://frontend.test")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "*"
    );
}
