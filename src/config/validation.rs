//! Configuration validation.
//!
//! Returns every problem found, not just the first. Besides range checks
//! this enforces separation of duties on the effective permission matrix:
//! the billing role holds at most `read` on clinical resources, and no role
//! holds more than `read` on the audit log.

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{GuardConfig, DEFAULT_OPERATION};
use crate::security::permissions::{PermissionLevel, PermissionMatrix};
use crate::security::types::{ResourceType, Role};

/// Longest window or block any setting may describe: one year.
pub const MAX_DURATION_SECS: u64 = 366 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_listener(config, &mut errors);
    validate_rate_limits(config, &mut errors);
    validate_brute_force(config, &mut errors);
    validate_anomaly(config, &mut errors);
    validate_permissions(config, &mut errors);
    validate_surfaces(config, &mut errors);
    validate_duration_bounds(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_listener(config: &GuardConfig, errors: &mut Vec<ValidationError>) {
    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_body_bytes", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
}

fn validate_rate_limits(config: &GuardConfig, errors: &mut Vec<ValidationError>) {
    let limits = &config.rate_limits;
    if !limits.operations.contains_key(DEFAULT_OPERATION) {
        errors.push(ValidationError::new(
            "rate_limits.operations",
            format!("a '{}' entry is required", DEFAULT_OPERATION),
        ));
    }

    for (name, op) in &limits.operations {
        let field = format!("rate_limits.operations.{}", name);
        if op.burst_limit == 0 || op.per_minute == 0 || op.per_hour == 0 {
            errors.push(ValidationError::new(&field, "limits must be greater than 0"));
        }
        if op.window_seconds == 0 {
            errors.push(ValidationError::new(&field, "window_seconds must be greater than 0"));
        }
        if op.per_minute > op.per_hour {
            errors.push(ValidationError::new(&field, "per_minute exceeds per_hour"));
        }
    }

    for (field, secs) in [
        ("rate_limits.burst_block_secs", limits.burst_block_secs),
        ("rate_limits.minute_block_secs", limits.minute_block_secs),
        ("rate_limits.hour_block_secs", limits.hour_block_secs),
    ] {
        if secs == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }
}

fn validate_brute_force(config: &GuardConfig, errors: &mut Vec<ValidationError>) {
    let bf = &config.brute_force;
    if bf.failure_window_secs == 0 {
        errors.push(ValidationError::new("brute_force.failure_window_secs", "must be greater than 0"));
    }
    if bf.lockout_threshold == 0 {
        errors.push(ValidationError::new("brute_force.lockout_threshold", "must be greater than 0"));
    }
    if bf.flag_threshold > bf.lockout_threshold {
        errors.push(ValidationError::new(
            "brute_force.flag_threshold",
            "must not exceed lockout_threshold",
        ));
    }
    if bf.max_lockout_hours == 0 {
        errors.push(ValidationError::new("brute_force.max_lockout_hours", "must be greater than 0"));
    }
}

fn validate_anomaly(config: &GuardConfig, errors: &mut Vec<ValidationError>) {
    let a = &config.anomaly;
    for (field, hour) in [
        ("anomaly.off_hours_start", a.off_hours_start),
        ("anomaly.off_hours_end", a.off_hours_end),
    ] {
        if hour > 23 {
            errors.push(ValidationError::new(field, "must be an hour between 0 and 23"));
        }
    }
    if a.utc_offset_minutes.abs() >= 24 * 60 {
        errors.push(ValidationError::new("anomaly.utc_offset_minutes", "must be within ±24h"));
    }

    let windows = [
        ("anomaly.volume_window_secs", a.volume_window_secs),
        ("anomaly.origin_window_secs", a.origin_window_secs),
        ("anomaly.off_hours_window_secs", a.off_hours_window_secs),
        ("anomaly.subject_window_secs", a.subject_window_secs),
    ];
    for (field, secs) in windows {
        if secs == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        } else if secs > a.history_secs {
            errors.push(ValidationError::new(field, "exceeds anomaly.history_secs"));
        }
    }
}

fn validate_permissions(config: &GuardConfig, errors: &mut Vec<ValidationError>) {
    if config.permissions.export_legal_basis.trim().is_empty() {
        errors.push(ValidationError::new("permissions.export_legal_basis", "must not be empty"));
    }

    let matrix = match PermissionMatrix::from_config(&config.permissions) {
        Ok(matrix) => matrix,
        Err(e) => {
            errors.push(ValidationError::new("permissions.matrix", e));
            return;
        }
    };

    for resource in ResourceType::ALL.into_iter().filter(|r| r.is_clinical()) {
        if matrix.level(Role::Billing, resource) > PermissionLevel::Read {
            errors.push(ValidationError::new(
                format!("permissions.matrix.billing.{}", resource),
                "billing may hold at most read on clinical resources",
            ));
        }
    }

    for role in Role::ALL {
        if matrix.level(role, ResourceType::AuditLog) > PermissionLevel::Read {
            errors.push(ValidationError::new(
                format!("permissions.matrix.{}.audit_log", role),
                "the audit log is read-only for every role",
            ));
        }
    }
}

fn validate_surfaces(config: &GuardConfig, errors: &mut Vec<ValidationError>) {
    if config.state.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("state.sweep_interval_secs", "must be greater than 0"));
    }
    if config.observability.metrics_enabled && config.observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }
    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "required when the admin API is enabled"));
    }
    if config.admin.enabled && config.admin.principal_id.is_empty() {
        errors.push(ValidationError::new("admin.principal_id", "must not be empty"));
    }
}

fn validate_duration_bounds(config: &GuardConfig, errors: &mut Vec<ValidationError>) {
    let limits = &config.rate_limits;
    let a = &config.anomaly;
    let mut durations = vec![
        ("rate_limits.burst_block_secs".to_string(), limits.burst_block_secs),
        ("rate_limits.minute_block_secs".to_string(), limits.minute_block_secs),
        ("rate_limits.hour_block_secs".to_string(), limits.hour_block_secs),
        ("brute_force.failure_window_secs".to_string(), config.brute_force.failure_window_secs),
        (
            "brute_force.max_lockout_hours".to_string(),
            u64::from(config.brute_force.max_lockout_hours) * 3600,
        ),
        ("anomaly.history_secs".to_string(), a.history_secs),
        ("anomaly.medium_block_secs".to_string(), a.medium_block_secs),
        ("anomaly.high_block_secs".to_string(), a.high_block_secs),
        ("anomaly.critical_block_secs".to_string(), a.critical_block_secs),
        ("state.sweep_interval_secs".to_string(), config.state.sweep_interval_secs),
    ];
    for (name, op) in &limits.operations {
        durations.push((format!("rate_limits.operations.{}.window_seconds", name), op.window_seconds));
    }

    for (field, secs) in durations {
        if secs > MAX_DURATION_SECS {
            errors.push(ValidationError::new(
                field,
                format!("must not exceed {} seconds", MAX_DURATION_SECS),
            ));
        }
    }
}
