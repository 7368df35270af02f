//! AI assistant relay endpoint.

use axum::{extract::State, Json};
use validator::Validate;

use crate::error::AppError;
use crate::handlers::http::AppState;
use crate::models::assistant::{AssistantReply, AssistantRequest};

/// POST /api/gemini: one prompt in, the assistant's reply text out.
pub async fn assistant_reply(
    State(state): State<AppState>,
    Json(body): Json<AssistantRequest>,
) -> Result<Json<AssistantReply>, AppError> {
    body.validate().map_err(|e| AppError::Validation(e.to_string()))?;
    if body.message.trim().is_empty() {
        return Err(AppError::Validation("message is empty".to_string()));
    }
    let text = state.assistant.reply(&body.message).await?;
    Ok(Json(AssistantReply { text }))
}
