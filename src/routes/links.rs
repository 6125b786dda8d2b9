use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::crawler;
use crate::error::{AppError, AppResult};
use crate::routes::documents::FilenamePayload;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LinkPayload {
    pub url: String,
}

/// Only absolute http(s) URLs with a host are crawled.
fn parse_link(raw: &str) -> AppResult<Url> {
    Url::parse(raw.trim())
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .ok_or_else(|| AppError::BadRequest("Invalid URL provided".into()))
}

pub async fn upload_link(State(state): State<AppState>, Json(payload): Json<LinkPayload>) -> AppResult<Json<Value>> {
    let url = parse_link(&payload.url)?;
    let preview = crawler::fetch(&state.client, &url).await?;
    let link = state.library.save_link(preview)?;
    tracing::info!(id = %link.id, url = %link.url, "link processed");

    Ok(Json(json!({
        "message": "Link processed successfully",
        "link": link,
    })))
}

pub async fn list_links(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "links": state.library.links() }))
}

pub async fn link_content(
    State(state): State<AppState>,
    Json(payload): Json<FilenamePayload>,
) -> AppResult<Json<Value>> {
    let link = state
        .library
        .link(&payload.filename)
        .ok_or_else(|| AppError::NotFound("Link not found".into()))?;
    Ok(Json(json!({ "response": link })))
}

pub async fn delete_link(
    State(state): State<AppState>,
    Json(payload): Json<FilenamePayload>,
) -> AppResult<Json<Value>> {
    state.library.delete_link(&payload.filename)?;
    tracing::info!(id = %payload.filename, "link deleted");
    Ok(Json(json!({ "response": "Link deleted successfully" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_http_urls_are_crawled() {
        assert!(parse_link("https://example.com/a").is_ok());
        assert!(parse_link("  http://localhost:8080 ").is_ok());
        assert!(parse_link("not-a-url").is_err());
        assert!(parse_link("ftp://example.com").is_err());
        assert!(parse_link("file:///etc/passwd").is_err());
    }
}
