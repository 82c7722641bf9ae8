use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::error::ShardError;

use super::AppState;

/// Routes that stay open for probes and scrapers.
const OPEN_PATHS: &[&str] = &["/health", "/metrics"];

pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ShardError> {
    let Some(token) = &state.api_token else {
        return Ok(next.run(request).await);
    };
    if OPEN_PATHS.contains(&request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    match presented {
        Some(presented) if presented == token.as_str() => Ok(next.run(request).await),
        _ => Err(ShardError::Unauthorized(
            "missing or invalid bearer token".to_string(),
        )),
    }
}
