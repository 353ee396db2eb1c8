use axum::{
    Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use oracle_chat::OracleError;
use oracle_chat::llm::{
    BackendDescriptor, BackendFactory, ChatNode, FactoryEnvironment, Message, MessageRole,
    normalize_endpoint,
};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpListener;

// In-process stand-in for an Ollama server. Like Ollama, `/api/chat` answers
// 404 for models that are not pulled, and an untagged name means `:latest`.
// Returns `host:port` without a scheme so every test also exercises endpoint
// normalization.
async fn spawn_mock_ollama(models: &[&str]) -> String {
    let pulled: Vec<String> = models.iter().map(ToString::to_string).collect();
    let tags = json!({
        "models": models
            .iter()
            .map(|m| json!({ "name": m, "model": m }))
            .collect::<Vec<_>>()
    });

    let app = Router::new()
        .route("/", get(|| async { "Ollama is running" }))
        .route(
            "/api/tags",
            get(move || {
                let tags = tags.clone();
                async move { Json(tags) }
            }),
        )
        .route(
            "/api/chat",
            post(move |Json(body): Json<Value>| {
                let pulled = pulled.clone();
                async move {
                    let model = body["model"].as_str().unwrap_or_default();
                    let model = if model.contains(':') {
                        model.to_string()
                    } else {
                        format!("{model}:latest")
                    };
                    if !pulled.contains(&model) {
                        return Err(StatusCode::NOT_FOUND);
                    }

                    let count = body["messages"].as_array().map_or(0, Vec::len);
                    Ok(Json(json!({
                        "model": model,
                        "message": {
                            "role": "assistant",
                            "content": format!("reply #{count} at t={}", body["options"]["temperature"])
                        },
                        "done": true
                    })))
                }
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("127.0.0.1:{}", addr.port())
}

// An address nothing listens on.
async fn closed_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("127.0.0.1:{port}")
}

fn factory() -> BackendFactory {
    BackendFactory::new(FactoryEnvironment {
        probe_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(5),
        ..FactoryEnvironment::default()
    })
}

fn descriptor(endpoint: &str, model: &str) -> BackendDescriptor {
    BackendDescriptor {
        endpoint: Some(endpoint.to_string()),
        model_name: model.to_string(),
        ..BackendDescriptor::default()
    }
}

#[tokio::test]
async fn test_client_built_for_listed_model() {
    let endpoint = spawn_mock_ollama(&["llama3:latest", "mistral_nemo_conservative:latest"]).await;

    let client = factory()
        .create_client(&descriptor(&endpoint, "mistral_nemo_conservative"))
        .await
        .unwrap()
        .expect("client should be built outside test mode");
    assert_eq!(client.model_name(), "mistral_nemo_conservative:latest");

    let reply = client
        .invoke(&[Message::system("be brief"), Message::user("hello")])
        .await
        .unwrap();
    assert_eq!(reply.role(), MessageRole::Assistant);
    assert_eq!(reply.content(), "reply #2 at t=0.5");
}

#[tokio::test]
async fn test_model_not_found_lists_catalog() {
    let endpoint = spawn_mock_ollama(&["llama3:latest", "qwen2:7b"]).await;

    let err = factory()
        .create_client(&descriptor(&endpoint, "phi3"))
        .await
        .unwrap_err();

    match err {
        OracleError::ModelNotFound {
            requested,
            available,
        } => {
            assert_eq!(requested, "phi3");
            assert_eq!(available, vec!["llama3:latest", "qwen2:7b"]);
        }
        other => panic!("expected ModelNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unpulled_tag_is_model_not_found() {
    let endpoint = spawn_mock_ollama(&["llama3:latest"]).await;

    let err = factory()
        .create_client(&descriptor(&endpoint, "llama3:8b"))
        .await
        .unwrap_err();

    assert!(
        matches!(&err, OracleError::ModelNotFound { requested, .. } if requested == "llama3:8b"),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_untagged_name_is_served_by_listed_tag() {
    let endpoint = spawn_mock_ollama(&["llama3:8b", "qwen2:7b"]).await;

    let client = factory()
        .create_client(&descriptor(&endpoint, "llama3"))
        .await
        .unwrap()
        .expect("client should be built outside test mode");
    assert_eq!(client.model_name(), "llama3:8b");

    let reply = client.invoke(&[Message::user("hi")]).await.unwrap();
    assert_eq!(reply.content(), "reply #1 at t=0.5");
}

#[tokio::test]
async fn test_unreachable_endpoint_is_backend_unavailable() {
    let endpoint = closed_endpoint().await;

    let err = factory()
        .create_client(&descriptor(&endpoint, "llama3"))
        .await
        .unwrap_err();

    match err {
        OracleError::BackendUnavailable { endpoint: e, .. } => {
            assert_eq!(e, format!("http://{endpoint}"));
        }
        other => panic!("expected BackendUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn test_test_mode_skips_network() {
    let endpoint = closed_endpoint().await;
    let factory = BackendFactory::new(FactoryEnvironment::test());

    let client = factory
        .create_client(&descriptor(&endpoint, "llama3"))
        .await
        .unwrap();
    assert!(client.is_none());
}

#[tokio::test]
async fn test_failed_connect_leaves_node_unavailable() {
    let endpoint = closed_endpoint().await;

    let node = ChatNode::connect(&factory(), &descriptor(&endpoint, "llama3")).await;
    assert!(!node.is_available());
    assert_eq!(node.identity().model_name, "llama3");

    let err = node.get_response(&[Message::user("hi")]).await.unwrap_err();
    assert!(matches!(err, OracleError::ModelUnavailable { .. }));
}

#[tokio::test]
async fn test_connected_node_answers() {
    let endpoint = spawn_mock_ollama(&["llama3:8b"]).await;

    let node = ChatNode::connect(&factory(), &descriptor(&endpoint, "llama3")).await;
    assert!(node.is_available());

    let reply = node.get_response(&[Message::user("hi")]).await.unwrap();
    assert_eq!(reply, Message::assistant("reply #1 at t=0.5"));
}

#[test]
fn test_scheme_less_endpoint_normalized() {
    assert_eq!(normalize_endpoint("example.com:11434"), "http://example.com:11434");
    assert_eq!(normalize_endpoint(" https://gpu.local:11434/ "), "https://gpu.local:11434");
}
