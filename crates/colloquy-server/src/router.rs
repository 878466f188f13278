use std::sync::Arc;

use axum::http::HeaderValue;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::TokenVerifier;
use crate::handlers::{chat, health, user};
use crate::llm::ChatGenerator;
use crate::metrics_middleware::HttpMetricsLayer;
use crate::middleware::{rate_limit, require_auth};
use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<dyn ChatGenerator>,
    pub verifier: TokenVerifier,
    /// Applied to every `/api/chat` route.
    pub chat_limiter: RateLimiter,
    /// Applied to the remaining authenticated route groups.
    pub api_limiter: RateLimiter,
}

pub fn build(state: AppState, cors_origins: &[String]) -> Router {
    // Layers run bottom-up: authentication first, then the limiter.
    let chat_routes = Router::new()
        .route("/send", post(chat::send_message))
        .route("/models", get(chat::models))
        .layer(from_fn_with_state(state.chat_limiter.clone(), rate_limit))
        .layer(from_fn_with_state(state.verifier.clone(), require_auth));

    let user_routes = Router::new()
        .route("/me", get(user::me))
        .layer(from_fn_with_state(state.api_limiter.clone(), rate_limit))
        .layer(from_fn_with_state(state.verifier.clone(), require_auth));

    let cors = build_cors_layer(cors_origins);

    Router::new()
        .route("/api/health", get(health::health))
        .nest("/api/chat", chat_routes)
        .nest("/api/users", user_routes)
        // Conversation history travels with each request; 1 MB is plenty.
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
        .layer(cors)
        .layer(HttpMetricsLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    if origins.is_empty() {
        // Without CQ_CORS_ORIGINS only a front-end served from
        // http://localhost may call the API.
        cors.allow_origin(AllowOrigin::exact(HeaderValue::from_static(
            "http://localhost",
        )))
    } else {
        let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(AllowOrigin::list(parsed))
    }
}
