use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{Extensions, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::audit::{AuditEntry, AuditEntryId, AuditRecord, ChainVerification};
use crate::http::handlers::blocking;
use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::security::{Action, ResourceType, SecurityBlock};

const DEFAULT_ENTRY_LIMIT: usize = 100;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub active_blocks: usize,
    pub tracked_windows: usize,
    pub tracked_principals: usize,
    pub audit_write_failures: u64,
}

#[derive(Serialize)]
pub struct UnblockResult {
    pub identifier: String,
    pub lifted: bool,
    pub audit_entry_id: AuditEntryId,
}

#[derive(Debug, Deserialize)]
pub struct EntriesQuery {
    pub limit: Option<usize>,
}

/// Peer address, when the server was started with connect info.
fn origin(extensions: &Extensions) -> String {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn admin_record(
    state: &AppState,
    action: Action,
    resource_type: ResourceType,
    resource_id: Option<String>,
    origin: String,
    context: serde_json::Value,
) -> AuditRecord {
    AuditRecord {
        principal_id: state.config.admin.principal_id.clone(),
        action,
        resource_type,
        resource_id,
        subject_id: None,
        origin,
        legal_basis: None,
        context,
    }
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let store = state.coordinator.store();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        active_blocks: store.blocks.len(),
        tracked_windows: store.tracked_windows(),
        tracked_principals: store.tracked_principals(),
        audit_write_failures: state.coordinator.audit().failure_count(),
    })
}

pub async fn get_blocks(State(state): State<AppState>) -> Json<Vec<SecurityBlock>> {
    let now = state.clock.now();
    Json(state.coordinator.store().blocks.snapshot(now))
}

pub async fn delete_block(
    State(state): State<AppState>,
    extensions: Extensions,
    Path(identifier): Path<String>,
) -> Result<(StatusCode, Json<UnblockResult>), ApiError> {
    let origin = origin(&extensions);
    let task_state = state.clone();
    let result = blocking(move || {
        let lifted = task_state.coordinator.store().blocks.lift(&identifier);
        let record = admin_record(
            &task_state,
            Action::Update,
            ResourceType::UserAccount,
            Some(identifier.clone()),
            origin,
            serde_json::json!({
                "event": "admin_unblock",
                "lifted": lifted.is_some(),
                "block_type": lifted.as_ref().map(|b| b.block_type.code()),
            }),
        );
        let audit_entry_id = task_state.coordinator.audit().record(record);
        UnblockResult {
            identifier,
            lifted: lifted.is_some(),
            audit_entry_id,
        }
    })
    .await?;

    tracing::warn!(
        identifier = %result.identifier,
        lifted = result.lifted,
        audit_entry_id = %result.audit_entry_id,
        "Block lifted by operator"
    );
    let status = if result.lifted { StatusCode::OK } else { StatusCode::NOT_FOUND };
    Ok((status, Json(result)))
}

pub async fn verify_audit(
    State(state): State<AppState>,
    extensions: Extensions,
) -> Result<Json<ChainVerification>, ApiError> {
    let origin = origin(&extensions);
    let verification = blocking(move || {
        let audit = Arc::clone(state.coordinator.audit());
        audit.record(admin_record(
            &state,
            Action::Read,
            ResourceType::AuditLog,
            None,
            origin,
            serde_json::json!({"event": "admin_audit_verify"}),
        ));
        audit.verify()
    })
    .await?
    .map_err(|e| {
        tracing::error!(error = %e, "Audit verification could not read the store");
        ApiError::internal()
    })?;
    Ok(Json(verification))
}

pub async fn get_audit_entries(
    State(state): State<AppState>,
    extensions: Extensions,
    Query(query): Query<EntriesQuery>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    let origin = origin(&extensions);
    let limit = query.limit.unwrap_or(DEFAULT_ENTRY_LIMIT);
    let entries = blocking(move || {
        let audit = Arc::clone(state.coordinator.audit());
        audit.record(admin_record(
            &state,
            Action::Read,
            ResourceType::AuditLog,
            None,
            origin,
            serde_json::json!({"event": "admin_audit_read", "limit": limit}),
        ));
        audit.entries(Some(limit))
    })
    .await?
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to read audit entries");
        ApiError::internal()
    })?;
    Ok(Json(entries))
}
