//! In-process guard for axum services.
//!
//! Mount per resource router:
//!
//! ```ignore
//! let records = Router::new()
//!     .route("/records/{id}", get(read_record).put(update_record))
//!     .layer(middleware::from_fn_with_state(
//!         GuardState::new(coordinator.clone(), ResourceType::MedicalRecord),
//!         security_guard,
//!     ));
//! ```
//!
//! The `Principal` must already be in the request extensions, placed there
//! by the identity layer. Paths ending in `/export` are treated as exports;
//! otherwise the action follows the HTTP method.

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::http::handlers::blocking;
use crate::http::request;
use crate::http::response::ApiError;
use crate::security::{AccessRequest, Action, Principal, ResourceType, SecurityCoordinator};

#[derive(Clone)]
pub struct GuardState {
    pub coordinator: Arc<SecurityCoordinator>,
    pub resource_type: ResourceType,
}

impl GuardState {
    pub fn new(coordinator: Arc<SecurityCoordinator>, resource_type: ResourceType) -> Self {
        Self {
            coordinator,
            resource_type,
        }
    }
}

pub fn action_for(method: &Method, path: &str) -> Action {
    if path.trim_end_matches('/').ends_with("/export") {
        return Action::Export;
    }
    match *method {
        Method::POST => Action::Create,
        Method::PUT | Method::PATCH => Action::Update,
        Method::DELETE => Action::Delete,
        _ => Action::Read,
    }
}

pub async fn security_guard(State(guard): State<GuardState>, mut req: Request<Body>, next: Next) -> Response {
    let Some(principal) = req.extensions().get::<Principal>().cloned() else {
        return ApiError::unauthorized().into_response();
    };

    let headers = req.headers();
    let mut access = AccessRequest::new(
        principal,
        action_for(req.method(), req.uri().path()),
        guard.resource_type,
        request::client_ip(&req),
    )
    .with_user_agent(request::user_agent(headers));
    access.resource_id = request::resource_id(headers);
    access.subject_id = request::subject_id(headers);
    access.request_id = request::request_id(headers);

    let coordinator = Arc::clone(&guard.coordinator);
    let decision = match blocking(move || coordinator.validate_and_record(&access)).await {
        Ok(decision) => decision,
        Err(e) => return e.into_response(),
    };

    if !decision.allowed {
        return ApiError::from_decision(decision).into_response();
    }

    req.extensions_mut().insert(decision);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_mapping() {
        assert_eq!(action_for(&Method::GET, "/records/1"), Action::Read);
        assert_eq!(action_for(&Method::HEAD, "/records/1"), Action::Read);
        assert_eq!(action_for(&Method::POST, "/records"), Action::Create);
        assert_eq!(action_for(&Method::PATCH, "/records/1"), Action::Update);
        assert_eq!(action_for(&Method::DELETE, "/records/1"), Action::Delete);
        assert_eq!(action_for(&Method::GET, "/records/1/export/"), Action::Export);
    }
}
