#![allow(dead_code)]

use axum::body::Body;
use axum::extract::Query;
use axum::http::{Request, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

use jamal_lib::config::ServerConfig;
use jamal_lib::AppState;

const VOCABULARY: &[&str] = &["tea", "coffee", "rust", "python", "dog"];

/// Stand-in for the Ollama runtime: `/api/chat` echoes the first line of
/// the last user message, embeddings count vocabulary words. It also
/// serves a small HTML page at `/page` for link crawling and a
/// DuckDuckGo-shaped results page at `/search`.
#[derive(Clone)]
pub struct FakeOllama {
    pub url: String,
    pub chats: Arc<Mutex<Vec<Value>>>,
}

impl FakeOllama {
    pub fn last_chat(&self) -> Value {
        self.chats.lock().unwrap().last().cloned().unwrap_or(Value::Null)
    }

    pub fn last_prompt(&self) -> String {
        let chat = self.last_chat();
        let messages = chat["messages"].as_array().cloned().unwrap_or_default();
        messages
            .last()
            .and_then(|m| m["content"].as_str())
            .unwrap_or_default()
            .to_string()
    }
}

fn embed_text(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut vector: Vec<f32> = VOCABULARY
        .iter()
        .map(|word| lower.matches(word).count() as f32)
        .collect();
    vector.push(0.01);
    vector
}

async fn fake_chat(
    axum::extract::State(chats): axum::extract::State<Arc<Mutex<Vec<Value>>>>,
    Json(body): Json<Value>,
) -> axum::response::Response {
    chats.lock().unwrap().push(body.clone());
    if body["model"] == "broken-model" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded").into_response();
    }
    let last = body["messages"]
        .as_array()
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default();
    let first_line = last.lines().next().unwrap_or_default();
    Json(json!({
        "model": body["model"],
        "message": { "role": "assistant", "content": format!("Echo: {first_line}") },
        "done": true,
    }))
    .into_response()
}

async fn fake_embeddings(Json(body): Json<Value>) -> Json<Value> {
    let prompt = body["prompt"].as_str().unwrap_or_default();
    Json(json!({ "embedding": embed_text(prompt) }))
}

async fn fake_page() -> Html<&'static str> {
    Html(
        r#"<html><head><title>Fake Page</title>
        <meta name="description" content="A page for tests">
        </head><body><h1>Hello</h1><p>Tea and coffee.</p></body></html>"#,
    )
}

async fn fake_search(Query(params): Query<HashMap<String, String>>) -> Html<String> {
    let query = params.get("q").cloned().unwrap_or_default();
    Html(format!(
        r##"<div class="result">
             <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fnews.example%2Frust&amp;rut=1">News about {query}</a>
             <a class="result__snippet" href="#">Fresh <b>{query}</b> coverage</a>
           </div>"##
    ))
}

pub async fn spawn_fake_ollama() -> FakeOllama {
    let chats = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/api/chat", post(fake_chat))
        .route("/api/embeddings", post(fake_embeddings))
        .route("/page", get(fake_page))
        .route("/search", get(fake_search))
        .with_state(chats.clone());
    let url = spawn(app).await;
    FakeOllama { url, chats }
}

/// Serve `app` on an ephemeral port and return its base URL.
pub async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub struct TestApp {
    pub dir: TempDir,
    pub state: AppState,
    pub router: Router,
    pub ollama: FakeOllama,
}

pub async fn test_app() -> TestApp {
    let ollama = spawn_fake_ollama().await;
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        data_dir: dir.path().to_path_buf(),
        ollama_host: ollama.url.clone(),
        llm_max_attempts: 1,
        llm_retry_delay_ms: 0,
        search_url: format!("{}/search", ollama.url),
        ..Default::default()
    };
    let state = AppState::new(config).unwrap();
    let router = jamal_lib::routes::router(state.clone());
    TestApp {
        dir,
        state,
        router,
        ollama,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn put_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::put(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn upload(&self, field: &str, filename: &str, content_type: &str, data: &[u8]) -> (StatusCode, Value) {
        let boundary = "jamal-test-boundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        self.send(
            Request::post("/document_upload")
                .header("content-type", format!("multipart/form-data; boundary={boundary}"))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }
}
