//! Bearer token authentication for `/v1` routes

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request};
use axum::middleware::Next;
use axum::response::Response;

use rand::RngCore;

use super::error::ApiError;
use super::state::AppState;

/// Prefix of generated API tokens
pub const TOKEN_PREFIX: &str = "idasen_";

/// Generate a random API token for `server.auth_tokens`
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);

    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{TOKEN_PREFIX}{hex}")
}

/// Reject requests without an accepted token. Accepts `Bearer <token>` or
/// the bare token in the `Authorization` header.
pub async fn require_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.auth_enabled() {
        return Ok(next.run(req).await);
    }

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).trim());

    match token {
        Some(token) if state.is_authorized(token) => Ok(next.run(req).await),
        _ => {
            tracing::warn!(path = %req.uri().path(), "Rejected unauthenticated request");
            Err(ApiError::Unauthorized)
        }
    }
}
