//! Operator API: status, block management and audit access.
//!
//! Every route sits behind `admin_auth_middleware`. Unblocks and audit reads
//! are written to the audit trail under `admin.principal_id`.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/blocks", get(get_blocks))
        .route("/admin/blocks/{identifier}", delete(delete_block))
        .route("/admin/audit/verify", get(verify_audit))
        .route("/admin/audit/entries", get(get_audit_entries))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
