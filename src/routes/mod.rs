pub mod chat;
pub mod documents;
pub mod links;
pub mod memory;
pub mod settings;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_mb * 1024 * 1024;
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/", get(index))
        .route("/health", get(|| async { Json("OK") }))
        .route("/chat", post(chat::chat))
        .route("/document_upload", post(documents::upload_document))
        .route("/documents", get(documents::list_documents))
        .route("/document_delete", post(documents::delete_document))
        .route("/link_upload", post(links::upload_link))
        .route("/links", get(links::list_links))
        .route("/link_content", post(links::link_content))
        .route("/link_delete", post(links::delete_link))
        .route("/store_memory", post(memory::store_memory))
        .route("/retrieve_memory", post(memory::retrieve_memory))
        .route("/memory_viewer", get(memory::memory_viewer))
        .route("/memory", get(|| async { Redirect::temporary("/memory_viewer") }))
        .route(
            "/settings",
            get(settings::get_settings).put(settings::update_setting),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Json<Value> {
    Json(json!({ "message": "Welcome to the ChatBot API" }))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o.trim() == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o.trim()).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}
