use axum::Router;
use axum::extract::{Json, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use quadchain::backend::{
    BackendError, BackendMode, GenerationOptions, GenerationRequest, InferenceBackend,
    RemoteBackend,
};
use quadchain::config::BackendConfig;
use quadchain::documents::{Chunk, ChunkId};
use quadchain::pipeline::{Stage, StagePayload, Upstream};

#[derive(Clone, Default)]
struct Recorded {
    bodies: Arc<Mutex<Vec<Value>>>,
    auth: Arc<Mutex<Vec<String>>>,
}

/// Serve `reply` for every completion request on a random local port.
async fn serve(status: StatusCode, reply: Value) -> (String, Recorded) {
    let recorded = Recorded::default();
    let state = (recorded.clone(), status, reply);

    async fn completions(
        State((recorded, status, reply)): State<(Recorded, StatusCode, Value)>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Response {
        recorded.bodies.lock().push(body);
        if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            recorded.auth.lock().push(value.to_string());
        }
        (status, Json(reply)).into_response()
    }

    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/v1/"), recorded)
}

/// Answer every connection with `raw` bytes, then hold it open for `hold`.
async fn serve_raw(raw: &'static str, hold: Duration) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 64 * 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(raw.as_bytes()).await;
                let _ = socket.flush().await;
                tokio::time::sleep(hold).await;
            });
        }
    });
    format!("http://{addr}/v1")
}

fn completion(content: &str) -> Value {
    json!({
        "id": "cmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

fn backend(endpoint: String) -> RemoteBackend {
    let mut config = BackendConfig {
        mode: BackendMode::Remote,
        endpoint,
        api_key: Some("secret".into()),
        ..BackendConfig::default()
    };
    config.models.keyword = Some("keyword-model".into());
    RemoteBackend::new(&config, Duration::from_secs(5)).unwrap()
}

fn chunk() -> Chunk {
    let text = "The turbine bearing temperature must stay below 80 degrees.".to_string();
    Chunk {
        chunk_id: ChunkId::new(7),
        source: "manual.txt".into(),
        page: Some(2),
        char_offset_start: 0,
        char_offset_end: text.chars().count(),
        text,
        oversized: false,
    }
}

async fn generate_keywords(backend: &RemoteBackend) -> Result<StagePayload, BackendError> {
    let chunk = chunk();
    let upstream = Upstream::default();
    let languages = vec!["en".to_string()];
    let options = GenerationOptions::default();
    let request = GenerationRequest {
        stage: Stage::Keyword,
        chunk: &chunk,
        upstream: &upstream,
        language: "en",
        languages: &languages,
        options: &options,
    };
    backend.generate(&request).await
}

#[tokio::test]
async fn test_keywords_from_chat_completion() {
    let (endpoint, recorded) = serve(
        StatusCode::OK,
        completion(r#"{"keywords": ["turbine bearing", "temperature"]}"#),
    )
    .await;
    let backend = backend(endpoint);
    assert!(backend.url().ends_with("/v1/chat/completions"));

    let payload = generate_keywords(&backend).await.unwrap();
    assert_eq!(payload.keywords(), ["turbine bearing", "temperature"]);

    let bodies = recorded.bodies.lock();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["model"], "keyword-model");
    assert_eq!(bodies[0]["stream"], false);
    assert_eq!(bodies[0]["messages"][0]["role"], "system");
    let user = bodies[0]["messages"][1]["content"].as_str().unwrap();
    assert!(user.contains("turbine bearing temperature"));
    assert_eq!(recorded.auth.lock().as_slice(), ["Bearer secret"]);
}

#[tokio::test]
async fn test_server_error_is_unavailable() {
    let (endpoint, _) = serve(StatusCode::SERVICE_UNAVAILABLE, json!({"error": "busy"})).await;
    let err = generate_keywords(&backend(endpoint)).await.unwrap_err();
    assert!(matches!(err, BackendError::Unavailable { .. }), "{err:?}");
}

#[tokio::test]
async fn test_rate_limit_is_unavailable() {
    let (endpoint, _) = serve(StatusCode::TOO_MANY_REQUESTS, json!({"error": "slow down"})).await;
    let err = generate_keywords(&backend(endpoint)).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_client_error_is_malformed() {
    let (endpoint, _) = serve(StatusCode::BAD_REQUEST, json!({"error": "bad model"})).await;
    let err = generate_keywords(&backend(endpoint)).await.unwrap_err();
    assert!(matches!(err, BackendError::MalformedResponse { .. }), "{err:?}");
}

#[tokio::test]
async fn test_unparsable_content_is_malformed() {
    let (endpoint, _) = serve(StatusCode::OK, completion("   ")).await;
    let err = generate_keywords(&backend(endpoint)).await.unwrap_err();
    assert!(matches!(err, BackendError::MalformedResponse { .. }));
}

#[tokio::test]
async fn test_connection_refused_is_unavailable() {
    // Bind then drop to get a port with nothing listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = generate_keywords(&backend(format!("http://{addr}/v1")))
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_stalled_body_is_unavailable() {
    // Headers arrive, the body never does.
    let endpoint = serve_raw(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 512\r\n\r\n{\"choices\":",
        Duration::from_secs(10),
    )
    .await;
    let config = BackendConfig {
        mode: BackendMode::Remote,
        endpoint,
        ..BackendConfig::default()
    };
    let backend = RemoteBackend::new(&config, Duration::from_millis(300)).unwrap();

    let err = generate_keywords(&backend).await.unwrap_err();
    assert!(matches!(err, BackendError::Unavailable { .. }), "{err:?}");
}

#[tokio::test]
async fn test_non_json_body_is_malformed() {
    let endpoint = serve_raw(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 9\r\nconnection: close\r\n\r\nnot json!",
        Duration::ZERO,
    )
    .await;
    let err = generate_keywords(&backend(endpoint)).await.unwrap_err();
    assert!(matches!(err, BackendError::MalformedResponse { .. }), "{err:?}");
}
