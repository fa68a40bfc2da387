//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files, and
//! every section has defaults so a minimal file is valid.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::security::permissions::PermissionLevel;
use crate::security::types::{ResourceType, Role};

/// Root configuration for the security engine and its service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration for the decision service.
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Per-operation sliding-window limits.
    pub rate_limits: RateLimitConfig,

    /// Failed-login tracking.
    pub brute_force: BruteForceConfig,

    /// Access-pattern heuristics.
    pub anomaly: AnomalyConfig,

    /// Role × resource matrix overrides and export policy.
    pub permissions: PermissionConfig,

    /// Audit trail storage.
    pub audit: AuditConfig,

    /// Block-table persistence and sweeping.
    pub state: StateConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Service-to-service authentication for the decision API.
    pub api: ApiConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8440".to_string(),
            max_body_bytes: 64 * 1024,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 10 }
    }
}

/// Limits for one operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct OperationLimits {
    /// Maximum requests inside the burst window.
    pub burst_limit: u32,
    /// Maximum requests inside any 60 second window.
    pub per_minute: u32,
    /// Maximum requests inside any 3600 second window.
    pub per_hour: u32,
    /// Length of the burst window in seconds.
    pub window_seconds: u64,
}

impl OperationLimits {
    pub const fn new(burst_limit: u32, per_minute: u32, per_hour: u32, window_seconds: u64) -> Self {
        Self {
            burst_limit,
            per_minute,
            per_hour,
            window_seconds,
        }
    }
}

/// Operation type used when a request names one that is not configured.
pub const DEFAULT_OPERATION: &str = "default";

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Limits keyed by operation type (`login`, `medical_access`, ...).
    pub operations: HashMap<String, OperationLimits>,

    /// Block length after a burst violation, in seconds.
    pub burst_block_secs: u64,

    /// Block length after a per-minute violation, in seconds.
    pub minute_block_secs: u64,

    /// Block length after a per-hour violation, in seconds.
    pub hour_block_secs: u64,
}

impl RateLimitConfig {
    /// Limits for `operation`, falling back to the `default` entry.
    pub fn limits_for(&self, operation: &str) -> Option<&OperationLimits> {
        self.operations
            .get(operation)
            .or_else(|| self.operations.get(DEFAULT_OPERATION))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let operations = HashMap::from([
            ("login".to_string(), OperationLimits::new(3, 5, 20, 10)),
            ("medical_access".to_string(), OperationLimits::new(5, 30, 500, 10)),
            ("export".to_string(), OperationLimits::new(2, 5, 20, 60)),
            ("api".to_string(), OperationLimits::new(20, 100, 2000, 10)),
            (DEFAULT_OPERATION.to_string(), OperationLimits::new(10, 60, 1000, 10)),
        ]);
        Self {
            operations,
            burst_block_secs: 5 * 60,
            minute_block_secs: 30 * 60,
            hour_block_secs: 2 * 60 * 60,
        }
    }
}

/// Failed-login tracking configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BruteForceConfig {
    /// Rolling window for failure counting, in seconds.
    pub failure_window_secs: u64,

    /// Failures at which attempts are allowed but flagged HIGH.
    pub flag_threshold: u32,

    /// Failures at which the identifier is locked out.
    pub lockout_threshold: u32,

    /// Upper bound for the lockout, in hours. One hour per failure below it.
    pub max_lockout_hours: u32,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            failure_window_secs: 3600,
            flag_threshold: 5,
            lockout_threshold: 10,
            max_lockout_hours: 24,
        }
    }
}

/// Access-pattern heuristic configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// How long access history is kept per principal, in seconds.
    pub history_secs: u64,

    /// Same-resource-type accesses tolerated within `volume_window_secs`.
    pub max_resource_accesses: u32,
    pub volume_window_secs: u64,

    /// Distinct origin IPs tolerated within `origin_window_secs`.
    pub max_distinct_origins: u32,
    pub origin_window_secs: u64,

    /// Off-hours accesses tolerated within `off_hours_window_secs`.
    pub max_off_hours_accesses: u32,
    pub off_hours_window_secs: u64,
    /// First off-hours hour (inclusive, local time).
    pub off_hours_start: u32,
    /// Last off-hours hour (exclusive, local time).
    pub off_hours_end: u32,
    /// Clinic local time offset from UTC, in minutes.
    pub utc_offset_minutes: i32,

    /// Distinct subjects tolerated within `subject_window_secs`.
    pub max_distinct_subjects: u32,
    pub subject_window_secs: u64,

    /// Block length per severity, in seconds.
    pub medium_block_secs: u64,
    pub high_block_secs: u64,
    pub critical_block_secs: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            history_secs: 24 * 3600,
            max_resource_accesses: 50,
            volume_window_secs: 3600,
            max_distinct_origins: 3,
            origin_window_secs: 3600,
            max_off_hours_accesses: 10,
            off_hours_window_secs: 8 * 3600,
            off_hours_start: 23,
            off_hours_end: 6,
            utc_offset_minutes: 0,
            max_distinct_subjects: 20,
            subject_window_secs: 30 * 60,
            medium_block_secs: 30 * 60,
            high_block_secs: 2 * 3600,
            critical_block_secs: 24 * 3600,
        }
    }
}

/// Permission matrix overrides and export policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PermissionConfig {
    /// Rows replacing the built-in matrix, keyed by role then resource type name.
    pub matrix: HashMap<String, HashMap<String, PermissionLevel>>,

    /// Roles allowed to export data at all.
    pub export_roles: Vec<Role>,

    /// Resource types that may leave the system through export.
    pub exportable_resources: Vec<ResourceType>,

    /// Legal basis logged with every export decision.
    pub export_legal_basis: String,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            matrix: HashMap::new(),
            export_roles: vec![Role::Admin, Role::Doctor],
            exportable_resources: vec![
                ResourceType::MedicalRecord,
                ResourceType::Patient,
                ResourceType::Prescription,
                ResourceType::LabResult,
                ResourceType::Document,
            ],
            export_legal_basis: "GDPR Art. 9(2)(h) / Art. 20: provision of health care and data portability"
                .to_string(),
        }
    }
}

/// What happens to an allow decision whose audit entry could not be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditFailurePolicy {
    /// Convert the allow into an `audit_unavailable` denial.
    #[default]
    FailClosed,
    /// Keep the allow; the failure is still escalated.
    FailOpen,
}

/// Audit trail configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// JSON-lines file for durable entries. In-memory when unset.
    pub path: Option<String>,

    /// fsync after every append.
    pub fsync: bool,

    /// Decision policy when an audit write fails.
    pub failure_policy: AuditFailurePolicy,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: None,
            fsync: true,
            failure_policy: AuditFailurePolicy::FailClosed,
        }
    }
}

/// Block-table persistence and sweeping.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StateConfig {
    /// JSON snapshot of active blocks, loaded at start and saved on sweep.
    pub blocks_path: Option<String>,

    /// Interval between sweeps of expired state, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            blocks_path: None,
            sweep_interval_secs: 60,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter directive (trace, debug, info, warn, error, or EnvFilter syntax).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9440".to_string(),
        }
    }
}

/// Decision API authentication.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ApiConfig {
    /// Bearer token business services present. Empty disables the decision API.
    pub service_token: String,
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Principal id admin actions are attributed to in the audit trail.
    pub principal_id: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            principal_id: "admin-api".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: GuardConfig = toml::from_str("").unwrap();
        assert_eq!(config.brute_force.lockout_threshold, 10);
        assert_eq!(config.anomaly.max_resource_accesses, 50);
        assert_eq!(config.audit.failure_policy, AuditFailurePolicy::FailClosed);
        assert!(config.rate_limits.limits_for("medical_access").is_some());
    }

    #[test]
    fn test_unknown_operation_falls_back_to_default() {
        let config = RateLimitConfig::default();
        let limits = config.limits_for("appointment_browse").unwrap();
        assert_eq!(limits, &config.operations[DEFAULT_OPERATION]);
    }

    #[test]
    fn test_parse_operations_and_matrix() {
        let raw = r#"
            [rate_limits.operations.login]
            burst_limit = 2
            per_minute = 4
            per_hour = 10
            window_seconds = 30

            [permissions.matrix.nurse]
            medical_record = "read"

            [audit]
            failure_policy = "fail_open"
        "#;
        let config: GuardConfig = toml::from_str(raw).unwrap();
        let login = config.rate_limits.limits_for("login").unwrap();
        assert_eq!(login.burst_limit, 2);
        assert_eq!(login.window_seconds, 30);
        assert_eq!(
            config.permissions.matrix["nurse"]["medical_record"],
            PermissionLevel::Read
        );
        assert_eq!(config.audit.failure_policy, AuditFailurePolicy::FailOpen);
    }
}
