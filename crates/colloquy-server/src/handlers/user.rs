use axum::Json;
use colloquy_common::api::MeResponse;

use crate::middleware::AuthUser;

#[tracing::instrument]
pub async fn me(auth: AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        id: auth.user_id.to_string(),
    })
}
