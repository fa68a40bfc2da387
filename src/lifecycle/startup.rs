//! Startup orchestration.
//!
//! Builds the shared state in dependency order. Any failure here is fatal:
//! the service never starts without its audit chain.

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::audit::{AuditError, AuditLog, AuditStore, JsonlAuditStore, MemoryAuditStore};
use crate::clock::{Clock, SystemClock};
use crate::config::GuardConfig;
use crate::http::server::AppState;
use crate::security::{BlockTable, SecurityCoordinator, SecurityStore};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to load block snapshot {path}: {source}")]
    Blocks {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open audit log: {0}")]
    Audit(#[from] AuditError),

    #[error("invalid permission matrix: {0}")]
    Permissions(String),
}

/// Everything the server and background tasks share.
pub fn build_state(config: GuardConfig) -> Result<AppState, StartupError> {
    build_state_with_clock(config, Arc::new(SystemClock))
}

pub fn build_state_with_clock(config: GuardConfig, clock: Arc<dyn Clock>) -> Result<AppState, StartupError> {
    let now = clock.now();

    let blocks = match &config.state.blocks_path {
        Some(path) => BlockTable::load_from_file(Path::new(path), now).map_err(|source| StartupError::Blocks {
            path: path.clone(),
            source,
        })?,
        None => BlockTable::new(),
    };
    let store = Arc::new(SecurityStore::with_blocks(blocks));

    let audit_store: Arc<dyn AuditStore> = match &config.audit.path {
        Some(path) => Arc::new(JsonlAuditStore::new(path, config.audit.fsync)),
        None => {
            tracing::warn!("audit.path not set; audit trail is kept in memory only");
            Arc::new(MemoryAuditStore::new())
        }
    };
    let audit = Arc::new(AuditLog::open(audit_store, Arc::clone(&clock))?);

    let coordinator = SecurityCoordinator::from_config(&config, store, audit, Arc::clone(&clock))
        .map_err(StartupError::Permissions)?;

    tracing::info!(
        failure_policy = ?config.audit.failure_policy,
        active_blocks = coordinator.store().blocks.len(),
        "Security engine ready"
    );

    Ok(AppState::new(Arc::new(coordinator), Arc::new(config), clock))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_with_persistent_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = GuardConfig::default();
        config.audit.path = Some(dir.path().join("audit.jsonl").display().to_string());
        config.state.blocks_path = Some(dir.path().join("blocks.json").display().to_string());

        let state = build_state(config).unwrap();
        assert!(state.coordinator.store().blocks.is_empty());
        assert!(state.coordinator.audit().verify().unwrap().intact);
    }

    #[test]
    fn test_corrupt_block_snapshot_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.json");
        std::fs::write(&path, "not json").unwrap();

        let mut config = GuardConfig::default();
        config.state.blocks_path = Some(path.display().to_string());
        assert!(matches!(build_state(config), Err(StartupError::Blocks { .. })));
    }
}
