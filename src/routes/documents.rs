use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::doc_processor::{guess_mime, is_allowed, parse_bytes};
use crate::error::{AppError, AppResult};
use crate::library::secure_filename;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct FilenamePayload {
    pub filename: String,
}

pub async fn upload_document(State(state): State<AppState>, mut multipart: Multipart) -> AppResult<Json<Value>> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        upload = Some((name, content_type, bytes));
        break;
    }

    let (raw_name, content_type, bytes) = upload.ok_or_else(|| AppError::BadRequest("No file part".into()))?;
    if raw_name.trim().is_empty() {
        return Err(AppError::BadRequest("No selected file".into()));
    }
    let filename = secure_filename(&raw_name);
    if !is_allowed(&filename) {
        return Err(AppError::BadRequest("File type not allowed".into()));
    }

    // PDF and OOXML extraction is CPU-bound.
    let parse_name = filename.clone();
    let data = bytes.clone();
    let parsed = tokio::task::spawn_blocking(move || parse_bytes(&parse_name, &data))
        .await
        .map_err(|e| AppError::Unprocessable(e.to_string()))?
        .map_err(AppError::Unprocessable)?;

    let mime_type = content_type
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream")
        .unwrap_or_else(|| guess_mime(&filename).to_string());
    let document = state
        .library
        .save_document(&filename, &mime_type, &bytes, parsed.content)?;
    tracing::info!(filename = %document.filename, size = document.size, kind = %parsed.file_type, "document uploaded");

    Ok(Json(json!({
        "message": "File uploaded successfully",
        "filename": document.filename,
        "content": document.content,
        "metadata": {
            "type": document.mime_type,
            "size": document.size,
            "timestamp": document.timestamp,
            "content": document.content,
        }
    })))
}

pub async fn list_documents(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "documents": state.library.documents() }))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Json(payload): Json<FilenamePayload>,
) -> AppResult<Json<Value>> {
    state.library.delete_document(&payload.filename)?;
    tracing::info!(filename = %payload.filename, "document deleted");
    Ok(Json(json!({ "response": "File deleted successfully" })))
}
