use axum::extract::State;
use axum::Json;
use chrono::Utc;
use colloquy_common::api::{ModelInfo, SendMessageRequest, SendMessageResponse};
use colloquy_common::models::{ChatMessage, MessageMetadata, Role};

use crate::error::{Result, ServerError};
use crate::llm::GenerationParams;
use crate::middleware::AuthUser;
use crate::router::AppState;

/// Most earlier turns forwarded to the model with a new message.
const MAX_HISTORY_TURNS: usize = 50;

/// Append the user's message to the supplied history and ask the model for
/// the next turn.
#[tracing::instrument(skip(state, auth, req), fields(user_id = %auth.user_id))]
pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>> {
    let message = ChatMessage::from_user(&req.message)?;
    req.settings.validate()?;

    if req.history.len() > MAX_HISTORY_TURNS {
        return Err(ServerError::Validation(format!(
            "history is limited to {MAX_HISTORY_TURNS} turns, got {}",
            req.history.len()
        )));
    }

    let mut turns = req.history;
    turns.push(message.to_turn());

    let params = GenerationParams::from(&req.settings);
    let completion = state
        .generator
        .generate(&turns, &params)
        .await
        .map_err(ServerError::Upstream)?;

    tracing::info!(
        model = %completion.model,
        response_time_ms = completion.response_time_ms,
        "generated reply"
    );

    let reply = ChatMessage {
        content: completion.content,
        role: Role::Assistant,
        timestamp: Utc::now(),
        tokens: completion
            .usage
            .as_ref()
            .map_or(0, |usage| usage.completion_tokens),
        metadata: Some(MessageMetadata {
            model: completion.model.clone(),
            temperature: req.settings.temperature,
            max_tokens: req.settings.max_tokens,
        }),
    };

    Ok(Json(SendMessageResponse {
        message,
        reply,
        usage: completion.usage,
        model: completion.model,
        finish_reason: completion.finish_reason,
        response_time_ms: completion.response_time_ms,
    }))
}

#[tracing::instrument(skip(state))]
pub async fn models(State(state): State<AppState>, _auth: AuthUser) -> Result<Json<Vec<ModelInfo>>> {
    let models = state
        .generator
        .list_models()
        .await
        .map_err(ServerError::ModelsUnavailable)?;
    Ok(Json(models))
}
