use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::config::SETTING_KEYS;
use crate::error::{AppError, AppResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SettingPayload {
    pub key: String,
    pub value: String,
}

/// Effective runtime settings: stored overrides merged over the config.
pub async fn get_settings(State(state): State<AppState>) -> AppResult<Json<BTreeMap<String, String>>> {
    let resolved = state.chatbot.model_settings();
    let mut map = BTreeMap::new();
    for key in SETTING_KEYS {
        let value = match state.db.get_setting(key)? {
            Some(value) if !value.trim().is_empty() => value,
            _ => match *key {
                "ollama_host" => state.config.ollama_host.clone(),
                "simple_model" => resolved.simple_model.clone(),
                "reasoned_model" => resolved.reasoned_model.clone(),
                "embedding_model" => resolved.embedding_model.clone(),
                _ => continue,
            },
        };
        map.insert(key.to_string(), value);
    }
    Ok(Json(map))
}

/// An empty value clears the override.
pub async fn update_setting(
    State(state): State<AppState>,
    Json(payload): Json<SettingPayload>,
) -> AppResult<Json<Value>> {
    if !SETTING_KEYS.contains(&payload.key.as_str()) {
        return Err(AppError::BadRequest(format!("Unknown setting key: {}", payload.key)));
    }
    let value = payload.value.trim();
    if value.is_empty() {
        state.db.delete_setting(&payload.key)?;
    } else {
        state.db.set_setting(&payload.key, value)?;
    }
    tracing::info!(key = %payload.key, "setting updated");
    Ok(Json(json!({ "response": "Setting updated" })))
}
