mod common;

use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use reqwest::Client;
use serde_json::{json, Value};

use common::spawn;
use jamal_lib::llm::{ChatMessage, ChatRequest, LlmError, Provider};

async fn completions(headers: HeaderMap, Json(body): Json<Value>) -> axum::response::Response {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer sk-test") {
        return (StatusCode::UNAUTHORIZED, "bad key").into_response();
    }
    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": format!("model={}", body["model"].as_str().unwrap_or_default()) } }]
    }))
    .into_response()
}

async fn embeddings(Json(body): Json<Value>) -> Json<Value> {
    let count = body["input"].as_array().map(Vec::len).unwrap_or(0);
    let data: Vec<Value> = (0..count).map(|i| json!({ "embedding": [i as f32, 1.0] })).collect();
    Json(json!({ "data": data }))
}

#[tokio::test]
async fn openai_compatible_chat_and_embeddings() {
    let base = spawn(
        Router::new()
            .route("/v1/chat/completions", post(completions))
            .route("/v1/embeddings", post(embeddings)),
    )
    .await;
    let client = Client::new();
    let request = ChatRequest {
        messages: vec![ChatMessage::user("hi")],
        model: "gpt-test".into(),
    };

    let provider = Provider::openai("sk-test".into(), format!("{base}/v1/"));
    let reply = provider.chat(&client, &request).await.unwrap();
    assert_eq!(reply.content, "model=gpt-test");
    assert_eq!(provider.embed(&client, "embed-test", "hello").await.unwrap(), vec![0.0, 1.0]);

    let keyless = Provider::openai(String::new(), format!("{base}/v1"));
    match keyless.chat(&client, &request).await {
        Err(LlmError::Api { status, message }) => {
            assert_eq!(status, 401);
            assert_eq!(message, "bad key");
        }
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn ollama_embed_falls_back_to_new_endpoint() {
    // Only the newer /api/embed route exists; /api/embeddings 404s.
    let base = spawn(Router::new().route(
        "/api/embed",
        post(|Json(body): Json<Value>| async move {
            assert_eq!(body["input"], "hello");
            Json(json!({ "embeddings": [[0.5, 0.25]] }))
        }),
    ))
    .await;

    let provider = Provider::ollama(base);
    let embedding = provider
        .embed(&Client::new(), "nomic-embed-text:latest", "hello")
        .await
        .unwrap();
    assert_eq!(embedding, vec![0.5, 0.25]);
}
