//! JSON error and denial responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::audit::AuditEntryId;
use crate::security::{DenialKind, SecurityDecision};

/// Body of every non-2xx response produced by the guard.
#[derive(Debug, Serialize)]
pub struct DenialBody {
    pub kind: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_entry_id: Option<AuditEntryId>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: DenialBody,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &str, reason: impl Into<String>) -> Self {
        Self {
            status,
            body: DenialBody {
                kind: kind.to_string(),
                reason: reason.into(),
                audit_entry_id: None,
            },
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "missing or invalid credentials")
    }

    /// Details stay in the log; the caller gets a generic reason.
    pub fn internal() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "internal_error",
            "security check unavailable",
        )
    }

    /// Response for a denied decision.
    pub fn from_decision(decision: SecurityDecision) -> Self {
        let kind = decision.denial_kind.unwrap_or(DenialKind::InternalError);
        Self {
            status: status_for(kind),
            body: DenialBody {
                kind: kind.code(),
                reason: decision.reason,
                audit_entry_id: Some(decision.audit_entry_id),
            },
        }
    }
}

pub fn status_for(kind: DenialKind) -> StatusCode {
    match kind {
        DenialKind::RateLimitExceeded(_) | DenialKind::BruteForceDetected => StatusCode::TOO_MANY_REQUESTS,
        DenialKind::PermissionDenied(_) | DenialKind::AnomalyDetected(_) => StatusCode::FORBIDDEN,
        DenialKind::AuditUnavailable | DenialKind::InternalError => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
