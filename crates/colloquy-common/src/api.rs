use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, ChatSettings, Turn};

/// Request body for POST /api/chat/send
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub message: String,
    /// Earlier turns of the conversation, oldest first.
    #[serde(default)]
    pub history: Vec<Turn>,
    #[serde(default)]
    pub settings: ChatSettings,
}

/// Token accounting reported by the language model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Response from POST /api/chat/send
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message: ChatMessage,
    pub reply: ChatMessage,
    pub usage: Option<Usage>,
    pub model: String,
    pub finish_reason: Option<String>,
    pub response_time_ms: u64,
}

/// One entry of GET /api/chat/models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub max_tokens: u32,
}

/// Response from GET /api/users/me
#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub id: String,
}

/// Response from GET /api/health
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Generic error body: `{"error": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body of a 429 response.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimitResponse {
    pub error: String,
    pub message: String,
}

impl RateLimitResponse {
    pub fn new(retry_after_secs: u64) -> Self {
        Self {
            error: "Rate limit exceeded".to_string(),
            message: format!(
                "Too many requests. Please try again in {retry_after_secs} seconds."
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_body_matches_wire_format() {
        let body = serde_json::to_value(RateLimitResponse::new(42)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "error": "Rate limit exceeded",
                "message": "Too many requests. Please try again in 42 seconds."
            })
        );
    }

    #[test]
    fn send_request_accepts_bare_message() {
        let req: SendMessageRequest = serde_json::from_str(r#"{ "message": "hi" }"#).unwrap();
        assert_eq!(req.message, "hi");
        assert!(req.history.is_empty());
        assert_eq!(req.settings, ChatSettings::default());
    }
}
