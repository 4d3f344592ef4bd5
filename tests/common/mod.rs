// Shared helpers for integration tests: an in-process fake of the upstream
// chat API and an AppState wired to it with in-memory stores.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use http_body_util::BodyExt;
use serde_json::{Value, json};

use fm_rss_backend::config::{Config, HashCost};
use fm_rss_backend::llm::ApiKeySource;
use fm_rss_backend::state::AppState;
use fm_rss_backend::store::{MemoryTokenStore, StaticSessionIdentity};

pub const ALICE_SESSION: &str = "session-alice";
pub const BOB_SESSION: &str = "session-bob";
pub const UPSTREAM_KEY: &str = "test-upstream-key";

/// What the fake upstream answers.
#[derive(Clone)]
pub struct UpstreamScript {
    pub completion_text: String,
    /// Raw SSE lines for `stream: true` requests, sent separated by blank lines.
    pub stream_lines: Vec<String>,
    pub models: Vec<String>,
    /// When set, every endpoint answers with this status and an error body.
    pub fail_status: Option<u16>,
}

impl Default for UpstreamScript {
    fn default() -> Self {
        Self {
            completion_text: "- a short summary".to_string(),
            stream_lines: stream_frames(&["Hel", "lo", "!"]),
            models: vec!["openrouter/auto".to_string(), "openai/gpt-4o-mini".to_string()],
            fail_status: None,
        }
    }
}

/// `data:` lines for the given deltas, a final usage frame and the sentinel.
pub fn stream_frames(deltas: &[&str]) -> Vec<String> {
    let mut lines: Vec<String> = deltas
        .iter()
        .map(|d| {
            format!(
                "data: {}",
                json!({"id": "gen-1", "model": "openrouter/auto", "choices": [{"delta": {"content": d}}]})
            )
        })
        .collect();
    lines.push(format!(
        "data: {}",
        json!({
            "id": "gen-1",
            "model": "openrouter/auto",
            "choices": [{"delta": {}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 4, "completion_tokens": 3, "total_tokens": 7}
        })
    ));
    lines.push("data: [DONE]".to_string());
    lines
}

pub struct Recorded {
    pub script: UpstreamScript,
    pub last_body: Mutex<Option<Value>>,
    pub last_headers: Mutex<Option<HeaderMap>>,
    pub chat_hits: AtomicUsize,
    pub model_hits: AtomicUsize,
}

pub struct FakeUpstream {
    pub base_url: String,
    pub recorded: Arc<Recorded>,
}

impl FakeUpstream {
    pub fn last_body(&self) -> Value {
        self.recorded.last_body.lock().unwrap().clone().expect("upstream saw no request")
    }

    pub fn last_header(&self, name: &str) -> Option<String> {
        self.recorded
            .last_headers
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|h| h.get(name))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    pub fn model_hits(&self) -> usize {
        self.recorded.model_hits.load(Ordering::SeqCst)
    }

    pub fn chat_hits(&self) -> usize {
        self.recorded.chat_hits.load(Ordering::SeqCst)
    }
}

fn failure(status: u16) -> Response {
    let status = StatusCode::from_u16(status).unwrap();
    (status, Json(json!({"error": {"message": "provider internals leaked here"}}))).into_response()
}

async fn chat_completions(
    State(rec): State<Arc<Recorded>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    rec.chat_hits.fetch_add(1, Ordering::SeqCst);
    *rec.last_headers.lock().unwrap() = Some(headers);
    *rec.last_body.lock().unwrap() = Some(body.clone());

    if let Some(status) = rec.script.fail_status {
        return failure(status);
    }

    let model = body["model"].as_str().unwrap_or("unknown").to_string();
    if body["stream"].as_bool() == Some(true) {
        let mut text = rec.script.stream_lines.join("\n\n");
        text.push_str("\n\n");
        return ([(header::CONTENT_TYPE, "text/event-stream")], text).into_response();
    }

    Json(json!({
        "id": "gen-sync",
        "model": model,
        "choices": [{
            "message": {"role": "assistant", "content": rec.script.completion_text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
    .into_response()
}

async fn models(State(rec): State<Arc<Recorded>>) -> Response {
    rec.model_hits.fetch_add(1, Ordering::SeqCst);
    if let Some(status) = rec.script.fail_status {
        return failure(status);
    }
    let data: Vec<Value> = rec.script.models.iter().map(|id| json!({"id": id})).collect();
    Json(json!({ "data": data })).into_response()
}

pub async fn spawn_upstream(script: UpstreamScript) -> FakeUpstream {
    let recorded = Arc::new(Recorded {
        script,
        last_body: Mutex::new(None),
        last_headers: Mutex::new(None),
        chat_hits: AtomicUsize::new(0),
        model_hits: AtomicUsize::new(0),
    });

    let app = Router::new()
        .route("/chat/completions", post(chat_completions))
        .route("/models", get(models))
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeUpstream {
        base_url: format!("http://{addr}"),
        recorded,
    }
}

pub fn test_state_with_key(upstream: &FakeUpstream, api_key: ApiKeySource) -> AppState {
    let mut config = Config::default();
    config.llm.base_url = upstream.base_url.clone();
    config.hash_cost = HashCost {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
    };

    let sessions = StaticSessionIdentity::new()
        .with_session(ALICE_SESSION, "alice")
        .with_session(BOB_SESSION, "bob");

    let state = AppState::new(config, Arc::new(MemoryTokenStore::new()), Arc::new(sessions), api_key)
        .expect("test state");
    state.mark_ready();
    state
}

pub fn test_state(upstream: &FakeUpstream) -> AppState {
    test_state_with_key(upstream, ApiKeySource::Fixed(UPSTREAM_KEY.to_string()))
}

pub fn app(state: AppState) -> Router {
    fm_rss_backend::create_router(state)
}

/// Collect a response body into a `serde_json::Value`.
pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn json_request(method: &str, uri: &str, bearer: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn empty_request(method: &str, uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

/// Issues a token for the session holder through the REST surface.
pub async fn issue_token(state: &AppState, session: &str, scopes: &[&str]) -> String {
    use tower::ServiceExt;

    let response = app(state.clone())
        .oneshot(json_request(
            "POST",
            "/api/mcp/tokens",
            Some(session),
            &json!({ "name": "agent", "scopes": scopes }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await["token"].as_str().unwrap().to_string()
}

pub fn rpc(method: &str, params: Value, id: Value) -> Value {
    json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": id })
}
