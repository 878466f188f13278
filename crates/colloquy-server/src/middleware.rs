use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::auth::{TokenVerifier, UserId};
use crate::error::ServerError;
use crate::rate_limit::{Decision, RateLimiter};
use crate::router::AppState;

/// Identity attached to the request by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    fn from_request_parts<'a, 'b, 'c>(
        parts: &'a mut Parts,
        _state: &'b AppState,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self, Self::Rejection>> + Send + 'c>,
    >
    where
        'a: 'c,
        'b: 'c,
        Self: 'c,
    {
        Box::pin(async move {
            parts
                .extensions
                .get::<AuthUser>()
                .cloned()
                .ok_or(ServerError::MissingToken)
        })
    }
}

/// Reject requests without a valid bearer token; otherwise attach the
/// caller's [`AuthUser`] and continue.
pub async fn require_auth(
    State(verifier): State<TokenVerifier>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let token = extract_bearer_token(req.headers()).ok_or(ServerError::MissingToken)?;
    let user_id = verifier.verify(token)?;

    req.extensions_mut().insert(AuthUser { user_id });
    Ok(next.run(req).await)
}

/// Apply the per-user rate limit to authenticated requests.
///
/// Must be layered inside [`require_auth`]. Requests that carry no
/// [`AuthUser`] are passed through untouched.
pub async fn rate_limit(State(limiter): State<RateLimiter>, req: Request, next: Next) -> Response {
    let Some(user_id) = req.extensions().get::<AuthUser>().map(|a| a.user_id.clone()) else {
        return next.run(req).await;
    };

    match limiter.check(&user_id) {
        Decision::Accepted => next.run(req).await,
        Decision::Rejected { retry_after_secs } => {
            tracing::info!(
                limiter = limiter.name(),
                user_id = %user_id,
                retry_after_secs,
                "request rejected by rate limiter"
            );
            ServerError::RateLimited { retry_after_secs }.into_response()
        }
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Extension, Router};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::tests::{token_for, SECRET};
    use crate::rate_limit::RateLimitConfig;

    fn limiter(max_requests: u64) -> RateLimiter {
        RateLimiter::new(
            "test",
            RateLimitConfig {
                max_requests,
                window: Duration::from_secs(60),
            },
        )
    }

    async fn whoami(Extension(auth): Extension<AuthUser>) -> String {
        auth.user_id.to_string()
    }

    fn protected(limiter: RateLimiter) -> Router {
        Router::new()
            .route("/", get(whoami))
            .layer(axum::middleware::from_fn_with_state(limiter, rate_limit))
            .layer(axum::middleware::from_fn_with_state(
                TokenVerifier::new(SECRET),
                require_auth,
            ))
    }

    fn request(token: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().uri("/");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert("authorization", "Basic abc".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert("authorization", "Bearer ".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert("authorization", "Bearer abc.def".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), Some("abc.def"));
    }

    #[tokio::test]
    async fn authenticated_requests_reach_the_handler() {
        let app = protected(limiter(5));
        let token = token_for("u1", SECRET, chrono::Duration::hours(1));

        let response = app.oneshot(request(Some(&token))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"u1");
    }

    #[tokio::test]
    async fn missing_and_bad_tokens_are_unauthorized() {
        let app = protected(limiter(5));

        let response = app.clone().oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.oneshot(request(Some("garbage"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn over_budget_requests_get_429() {
        let limiter = limiter(2);
        let app = protected(limiter.clone());
        let token = token_for("u1", SECRET, chrono::Duration::hours(1));

        for _ in 0..2 {
            let response = app.clone().oneshot(request(Some(&token))).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(request(Some(&token))).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry: u64 = response.headers()["retry-after"]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry > 0 && retry <= 60);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "Rate limit exceeded");
        assert_eq!(
            body["message"],
            format!("Too many requests. Please try again in {retry} seconds.")
        );

        // A different user still has a full budget.
        let other = token_for("u2", SECRET, chrono::Duration::hours(1));
        let response = app.oneshot(request(Some(&other))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(limiter.store().get(&UserId::from("u1")).map(|w| w.count), Some(2));
    }

    #[tokio::test]
    async fn unauthenticated_requests_bypass_the_limiter() {
        let limiter = limiter(1);
        let app = Router::new()
            .route("/", get(|| async { "open" }))
            .layer(axum::middleware::from_fn_with_state(limiter.clone(), rate_limit));

        for _ in 0..10 {
            let response = app.clone().oneshot(request(None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert!(limiter.store().is_empty());
    }
}
