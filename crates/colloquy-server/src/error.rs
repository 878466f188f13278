use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use colloquy_common::api::{ErrorResponse, RateLimitResponse};
use colloquy_common::CommonError;
use thiserror::Error;

use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("No bearer token supplied")]
    MissingToken,

    #[error("Bearer token rejected: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("AI service error: {0}")]
    Upstream(#[source] LlmError),

    #[error("Failed to fetch available models: {0}")]
    ModelsUnavailable(#[source] LlmError),
}

impl From<CommonError> for ServerError {
    fn from(e: CommonError) -> Self {
        ServerError::Validation(e.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ServerError::MissingToken => {
                (StatusCode::UNAUTHORIZED, "Not authorized, no token".to_string())
            }
            ServerError::InvalidToken(e) => {
                tracing::debug!(error = %e, "token verification failed");
                (StatusCode::UNAUTHORIZED, "Not authorized, token failed".to_string())
            }
            ServerError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ServerError::RateLimited { retry_after_secs } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(RateLimitResponse::new(retry_after_secs)),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                return response;
            }
            ServerError::Upstream(e) => {
                tracing::error!(error = %e, "language model request failed");
                (StatusCode::BAD_GATEWAY, "AI service error".to_string())
            }
            ServerError::ModelsUnavailable(e) => {
                tracing::error!(error = %e, "failed to list models");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to fetch available models".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use serde_json::json;

    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn rate_limited_sets_status_body_and_header() {
        let response = ServerError::RateLimited {
            retry_after_secs: 12,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "12");
        assert_eq!(
            body_json(response).await,
            json!({
                "error": "Rate limit exceeded",
                "message": "Too many requests. Please try again in 12 seconds."
            })
        );
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let response = ServerError::MissingToken.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Not authorized, no token" })
        );
    }

    #[tokio::test]
    async fn common_validation_errors_become_bad_request() {
        let response = ServerError::from(CommonError::EmptyMessage).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Message content is required" })
        );
    }

    #[tokio::test]
    async fn upstream_failures_hide_provider_details() {
        let response = ServerError::Upstream(LlmError::Api {
            status: 401,
            message: "Incorrect API key provided: sk-live-123".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "AI service error");
    }
}
