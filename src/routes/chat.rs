use axum::{extract::State, Json};

use crate::chatbot::{ChatAnswer, ChatQuery};
use crate::error::AppResult;
use crate::AppState;

pub async fn chat(State(state): State<AppState>, Json(query): Json<ChatQuery>) -> AppResult<Json<ChatAnswer>> {
    Ok(Json(state.chatbot.reply(&query).await?))
}
