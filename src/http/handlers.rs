//! Decision service handlers.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::http::request;
use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::security::{AccessRequest, AuthenticationAttempt, SecurityDecision};

/// Run a synchronous engine call off the async workers. The call runs to
/// completion even if the client disconnects.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        tracing::error!(error = %e, "Security engine task failed");
        ApiError::internal()
    })
}

/// Whether `headers` carry `Authorization: Bearer <expected>`.
pub(crate) fn bearer_matches(headers: &HeaderMap, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
}

/// Business services authenticate with the configured service token.
pub async fn service_auth(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    if bearer_matches(req.headers(), &state.config.api.service_token) {
        next.run(req).await
    } else {
        tracing::warn!(path = %req.uri().path(), "Rejected decision API call without valid service token");
        ApiError::unauthorized().into_response()
    }
}

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub active_blocks: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        active_blocks: state.coordinator.store().blocks.len(),
    })
}

pub async fn decide(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut access): Json<AccessRequest>,
) -> Result<Json<SecurityDecision>, ApiError> {
    if access.request_id.is_none() {
        access.request_id = request::request_id(&headers);
    }
    let coordinator = Arc::clone(&state.coordinator);
    let decision = blocking(move || coordinator.validate_and_record(&access)).await?;
    Ok(Json(decision))
}

pub async fn authenticate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut attempt): Json<AuthenticationAttempt>,
) -> Result<Json<SecurityDecision>, ApiError> {
    if attempt.request_id.is_none() {
        attempt.request_id = request::request_id(&headers);
    }
    let coordinator = Arc::clone(&state.coordinator);
    let decision = blocking(move || coordinator.record_authentication(&attempt)).await?;
    Ok(Json(decision))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_matching() {
        let mut headers = HeaderMap::new();
        assert!(!bearer_matches(&headers, "secret"));

        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        assert!(bearer_matches(&headers, "secret"));
        assert!(!bearer_matches(&headers, "secreT"));
        assert!(!bearer_matches(&headers, ""));
    }
}
