//! The decision pipeline.
//!
//! ```text
//! validate_and_record(request):
//!     PENDING            → rate limit (principal id × operation)
//!     RATE_CHECKED       → permission matrix
//!     PERMISSION_CHECKED → anomaly heuristics
//!     ANOMALY_CHECKED    → COMPLETE
//!     any outcome        → exactly one audit entry
//! ```
//!
//! The first failing check ends the pipeline. `stage` on the returned
//! decision is the last stage the request passed.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::audit::{AuditEntryId, AuditLog, AuditRecord};
use crate::clock::Clock;
use crate::config::schema::{AuditFailurePolicy, GuardConfig};
use crate::observability::metrics;
use crate::security::permissions::{PermissionMatrix, PermissionValidator};
use crate::security::rate_limit::RateLimiter;
use crate::security::store::{SecurityStore, SweepReport};
use crate::security::threat::ThreatDetector;
use crate::security::types::{
    AccessRequest, Action, AuthenticationAttempt, DenialKind, RequestContext, ResourceType, ThreatLevel,
    ThreatVerdict,
};

/// Operation type used for login rate limits.
pub const LOGIN_OPERATION: &str = "login";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStage {
    Pending,
    RateChecked,
    PermissionChecked,
    AnomalyChecked,
    Complete,
}

impl RequestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::RateChecked => "rate_checked",
            Self::PermissionChecked => "permission_checked",
            Self::AnomalyChecked => "anomaly_checked",
            Self::Complete => "complete",
        }
    }

    fn next(self) -> Self {
        match self {
            Self::Pending => Self::RateChecked,
            Self::RateChecked => Self::PermissionChecked,
            Self::PermissionChecked => Self::AnomalyChecked,
            Self::AnomalyChecked | Self::Complete => Self::Complete,
        }
    }
}

/// Final answer for one request or authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityDecision {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_kind: Option<DenialKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threat_level: Option<ThreatLevel>,
    pub reason: String,
    pub stage: RequestStage,
    pub audit_entry_id: AuditEntryId,
}

/// Outcome of the checks before it is audited.
struct Outcome {
    allowed: bool,
    denial_kind: Option<DenialKind>,
    threat_level: Option<ThreatLevel>,
    reason: String,
    stage: RequestStage,
    legal_basis: Option<String>,
}

impl Outcome {
    fn from_verdict(verdict: ThreatVerdict, stage: RequestStage) -> Self {
        let threat_level = (!verdict.allowed || verdict.threat_level > ThreatLevel::Low).then_some(verdict.threat_level);
        Self {
            allowed: verdict.allowed,
            denial_kind: verdict.denial,
            threat_level,
            reason: verdict.reason,
            stage,
            legal_basis: None,
        }
    }
}

pub struct SecurityCoordinator {
    rate_limiter: RateLimiter,
    permissions: PermissionValidator,
    detector: ThreatDetector,
    audit: Arc<AuditLog>,
    store: Arc<SecurityStore>,
    failure_policy: AuditFailurePolicy,
}

impl SecurityCoordinator {
    pub fn new(
        rate_limiter: RateLimiter,
        permissions: PermissionValidator,
        detector: ThreatDetector,
        audit: Arc<AuditLog>,
        store: Arc<SecurityStore>,
        failure_policy: AuditFailurePolicy,
    ) -> Self {
        Self {
            rate_limiter,
            permissions,
            detector,
            audit,
            store,
            failure_policy,
        }
    }

    /// Wire every component from configuration around shared state.
    pub fn from_config(
        config: &GuardConfig,
        store: Arc<SecurityStore>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, String> {
        let matrix = PermissionMatrix::from_config(&config.permissions)?;
        Ok(Self::new(
            RateLimiter::new(
                config.rate_limits.clone(),
                config.brute_force.clone(),
                Arc::clone(&store),
                Arc::clone(&clock),
            ),
            PermissionValidator::new(matrix, &config.permissions),
            ThreatDetector::new(config.anomaly.clone(), Arc::clone(&store), clock),
            audit,
            store,
            config.audit.failure_policy,
        ))
    }

    /// Rate-limit bucket for an access.
    pub fn operation_for(action: Action, resource_type: ResourceType) -> &'static str {
        if action == Action::Export {
            "export"
        } else if resource_type.is_clinical() {
            "medical_access"
        } else {
            "api"
        }
    }

    /// Run the full pipeline for one access request and audit the outcome.
    pub fn validate_and_record(&self, request: &AccessRequest) -> SecurityDecision {
        let start = Instant::now();
        let ctx = request.context();
        let operation = Self::operation_for(request.action, request.resource_type);
        let outcome = self.evaluate(request, operation, &ctx);

        let record = AuditRecord {
            principal_id: request.principal.id.clone(),
            action: request.action,
            resource_type: request.resource_type,
            resource_id: request.resource_id.clone(),
            subject_id: request.subject_id.clone(),
            origin: ctx.origin_ip.to_string(),
            legal_basis: outcome.legal_basis.clone(),
            context: serde_json::json!({
                "event": "access",
                "stage": outcome.stage.as_str(),
                "allowed": outcome.allowed,
                "denial": outcome.denial_kind.map(|k| k.code()),
                "threat_level": outcome.threat_level,
                "reason": outcome.reason,
                "role": request.principal.role,
                "operation": operation,
                "user_agent": ctx.user_agent,
                "request_id": ctx.request_id,
                "client_timestamp": request.timestamp,
            }),
        };

        let decision = self.finish(outcome, record);
        tracing::info!(
            principal_id = %request.principal.id,
            role = %request.principal.role,
            action = %request.action,
            resource_type = %request.resource_type,
            allowed = decision.allowed,
            stage = decision.stage.as_str(),
            denial = decision.denial_kind.map(|k| k.code()).unwrap_or_default(),
            audit_entry_id = %decision.audit_entry_id,
            "Access decision"
        );
        metrics::record_decision(decision.allowed, decision.stage.as_str(), start);
        decision
    }

    fn evaluate(&self, request: &AccessRequest, operation: &str, ctx: &RequestContext) -> Outcome {
        let mut stage = RequestStage::Pending;

        let rate = self.rate_limiter.check_rate_limit(&request.principal.id, operation, ctx);
        if !rate.allowed {
            return Outcome::from_verdict(rate, stage);
        }
        stage = stage.next();

        let permission = self.permissions.validate(
            &request.principal,
            request.action,
            request.resource_type,
            request.resource_id.as_deref(),
            request.subject_id.as_deref(),
        );
        if !permission.allowed {
            return Outcome {
                allowed: false,
                denial_kind: permission.violation_type.map(DenialKind::PermissionDenied),
                threat_level: Some(ThreatLevel::Medium),
                reason: permission.reason,
                stage,
                legal_basis: permission.legal_basis,
            };
        }
        stage = stage.next();

        let anomaly = self.detector.detect_anomaly(request);
        if !anomaly.allowed {
            let mut outcome = Outcome::from_verdict(anomaly, stage);
            outcome.legal_basis = permission.legal_basis;
            return outcome;
        }
        stage = stage.next();

        let threat_level = (rate.threat_level.max(anomaly.threat_level) > ThreatLevel::Low)
            .then(|| rate.threat_level.max(anomaly.threat_level));
        stage = stage.next();
        Outcome {
            allowed: true,
            denial_kind: None,
            threat_level,
            reason: permission.reason,
            stage,
            legal_basis: permission.legal_basis,
        }
    }

    /// Rate-limit and brute-force accounting for a login outcome.
    pub fn record_authentication(&self, attempt: &AuthenticationAttempt) -> SecurityDecision {
        let start = Instant::now();
        let ctx = attempt.context();

        let rate = self.rate_limiter.check_rate_limit(&attempt.identifier, LOGIN_OPERATION, &ctx);
        // Runs even when the rate limit refused the attempt, so fast retries
        // still reach the lockout.
        let lockout = self
            .rate_limiter
            .check_brute_force(&attempt.identifier, LOGIN_OPERATION, attempt.success, &ctx);
        // Authentication has no permission or anomaly stage.
        let outcome = if lockout.denial == Some(DenialKind::BruteForceDetected) {
            let stage = if rate.allowed {
                RequestStage::RateChecked
            } else {
                RequestStage::Pending
            };
            Outcome::from_verdict(lockout, stage)
        } else if !rate.allowed {
            Outcome::from_verdict(rate, RequestStage::Pending)
        } else if !lockout.allowed {
            Outcome::from_verdict(lockout, RequestStage::RateChecked)
        } else {
            Outcome::from_verdict(lockout, RequestStage::Complete)
        };

        let record = AuditRecord {
            principal_id: attempt.identifier.clone(),
            action: Action::Read,
            resource_type: ResourceType::UserAccount,
            resource_id: None,
            subject_id: None,
            origin: ctx.origin_ip.to_string(),
            legal_basis: None,
            context: serde_json::json!({
                "event": "authentication",
                "success": attempt.success,
                "stage": outcome.stage.as_str(),
                "allowed": outcome.allowed,
                "denial": outcome.denial_kind.map(|k| k.code()),
                "threat_level": outcome.threat_level,
                "reason": outcome.reason,
                "user_agent": ctx.user_agent,
                "request_id": ctx.request_id,
            }),
        };

        let decision = self.finish(outcome, record);
        tracing::info!(
            identifier = %attempt.identifier,
            success = attempt.success,
            allowed = decision.allowed,
            denial = decision.denial_kind.map(|k| k.code()).unwrap_or_default(),
            audit_entry_id = %decision.audit_entry_id,
            "Authentication recorded"
        );
        metrics::record_decision(decision.allowed, decision.stage.as_str(), start);
        decision
    }

    /// Write the single audit entry and apply the audit failure policy.
    fn finish(&self, outcome: Outcome, record: AuditRecord) -> SecurityDecision {
        let audit_entry_id = self.audit.record(record);

        if outcome.allowed && audit_entry_id.is_failed() && self.failure_policy == AuditFailurePolicy::FailClosed {
            return SecurityDecision {
                allowed: false,
                denial_kind: Some(DenialKind::AuditUnavailable),
                threat_level: Some(ThreatLevel::High),
                reason: "audit trail unavailable".to_string(),
                stage: outcome.stage,
                audit_entry_id,
            };
        }

        SecurityDecision {
            allowed: outcome.allowed,
            denial_kind: outcome.denial_kind,
            threat_level: outcome.threat_level,
            reason: outcome.reason,
            stage: outcome.stage,
            audit_entry_id,
        }
    }

    /// Purge expired blocks and idle windows and histories.
    pub fn sweep(&self, now: chrono::DateTime<chrono::Utc>) -> SweepReport {
        self.store.sweep(
            now,
            self.rate_limiter.horizon(),
            self.rate_limiter.failure_horizon(),
            self.detector.horizon(),
        )
    }

    pub fn store(&self) -> &Arc<SecurityStore> {
        &self.store
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn permissions(&self) -> &PermissionValidator {
        &self.permissions
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn detector(&self) -> &ThreatDetector {
        &self.detector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEntry, AuditError, AuditStore};
    use crate::clock::ManualClock;
    use crate::security::types::{Principal, RateWindow, Role, ViolationType};
    use chrono::{TimeDelta, TimeZone, Utc};
    use std::net::{IpAddr, Ipv4Addr};

    const IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));

    fn setup(config: GuardConfig) -> (SecurityCoordinator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()));
        let audit = Arc::new(AuditLog::in_memory(clock.clone()));
        let coordinator =
            SecurityCoordinator::from_config(&config, Arc::new(SecurityStore::new()), audit, clock.clone()).unwrap();
        (coordinator, clock)
    }

    fn request(role: Role, action: Action, resource: ResourceType) -> AccessRequest {
        AccessRequest::new(Principal::new("user-1", role), action, resource, IP)
    }

    #[test]
    fn test_operation_mapping() {
        assert_eq!(SecurityCoordinator::operation_for(Action::Export, ResourceType::Billing), "export");
        assert_eq!(
            SecurityCoordinator::operation_for(Action::Read, ResourceType::LabResult),
            "medical_access"
        );
        assert_eq!(SecurityCoordinator::operation_for(Action::Create, ResourceType::Appointment), "api");
    }

    #[test]
    fn test_allowed_request_reaches_complete() {
        let (coordinator, _) = setup(GuardConfig::default());
        let decision = coordinator.validate_and_record(&request(Role::Doctor, Action::Read, ResourceType::MedicalRecord));
        assert!(decision.allowed);
        assert_eq!(decision.stage, RequestStage::Complete);
        assert!(!decision.audit_entry_id.is_failed());
        assert_eq!(coordinator.audit().entries(None).unwrap().len(), 1);
    }

    #[test]
    fn test_permission_denial_stops_at_rate_checked() {
        let (coordinator, _) = setup(GuardConfig::default());
        let decision =
            coordinator.validate_and_record(&request(Role::Receptionist, Action::Write, ResourceType::MedicalRecord));
        assert!(!decision.allowed);
        assert_eq!(
            decision.denial_kind,
            Some(DenialKind::PermissionDenied(ViolationType::WriteViolation))
        );
        assert_eq!(decision.stage, RequestStage::RateChecked);

        let entries = coordinator.audit().entries(None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, decision.audit_entry_id);
        assert_eq!(entries[0].context["allowed"], false);
        // Denied at the permission stage: no anomaly history recorded.
        assert_eq!(coordinator.detector().history_len("user-1"), 0);
    }

    #[test]
    fn test_rate_denial_is_pending_stage() {
        let (coordinator, _) = setup(GuardConfig::default());
        let req = request(Role::Doctor, Action::Read, ResourceType::Prescription);
        for _ in 0..5 {
            assert!(coordinator.validate_and_record(&req).allowed);
        }
        let decision = coordinator.validate_and_record(&req);
        assert_eq!(
            decision.denial_kind,
            Some(DenialKind::RateLimitExceeded(RateWindow::Burst))
        );
        assert_eq!(decision.stage, RequestStage::Pending);
        assert_eq!(decision.threat_level, Some(ThreatLevel::Medium));
        assert_eq!(coordinator.audit().entries(None).unwrap().len(), 6);
    }

    struct FailingStore;

    impl AuditStore for FailingStore {
        fn append(&self, _: &AuditEntry) -> Result<(), AuditError> {
            Err(AuditError::Poisoned)
        }

        fn load(&self) -> Result<Vec<AuditEntry>, AuditError> {
            Ok(Vec::new())
        }
    }

    fn with_failing_audit(policy: AuditFailurePolicy) -> SecurityCoordinator {
        let mut config = GuardConfig::default();
        config.audit.failure_policy = policy;
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()));
        let audit = Arc::new(AuditLog::open(Arc::new(FailingStore), clock.clone()).unwrap());
        SecurityCoordinator::from_config(&config, Arc::new(SecurityStore::new()), audit, clock).unwrap()
    }

    #[test]
    fn test_audit_failure_fail_closed() {
        let coordinator = with_failing_audit(AuditFailurePolicy::FailClosed);
        let decision = coordinator.validate_and_record(&request(Role::Doctor, Action::Read, ResourceType::Patient));
        assert!(!decision.allowed);
        assert_eq!(decision.denial_kind, Some(DenialKind::AuditUnavailable));
        assert!(decision.audit_entry_id.is_failed());
        assert_eq!(coordinator.audit().failure_count(), 1);
    }

    #[test]
    fn test_audit_failure_fail_open_and_denials_stay_denied() {
        let coordinator = with_failing_audit(AuditFailurePolicy::FailOpen);
        let allowed = coordinator.validate_and_record(&request(Role::Doctor, Action::Read, ResourceType::Patient));
        assert!(allowed.allowed);
        assert!(allowed.audit_entry_id.is_failed());

        let denied = coordinator.validate_and_record(&request(Role::Billing, Action::Delete, ResourceType::Patient));
        assert!(!denied.allowed);
        assert_eq!(
            denied.denial_kind,
            Some(DenialKind::PermissionDenied(ViolationType::DeleteViolation))
        );
    }

    #[test]
    fn test_authentication_lockout() {
        let (coordinator, clock) = setup(GuardConfig::default());
        let attempt = AuthenticationAttempt {
            identifier: "front-desk".into(),
            success: false,
            origin_ip: IP,
            user_agent: "test".into(),
            request_id: None,
        };

        for i in 1..=9 {
            let decision = coordinator.record_authentication(&attempt);
            assert!(decision.allowed, "attempt {} should pass", i);
            clock.advance(TimeDelta::seconds(60));
        }
        let tenth = coordinator.record_authentication(&attempt);
        assert_eq!(tenth.denial_kind, Some(DenialKind::BruteForceDetected));

        clock.advance(TimeDelta::seconds(60));
        let eleventh = coordinator.record_authentication(&attempt);
        assert!(!eleventh.allowed);
        assert_eq!(eleventh.denial_kind, Some(DenialKind::BruteForceDetected));
        assert_eq!(coordinator.audit().entries(None).unwrap().len(), 11);
    }

    #[test]
    fn test_rapid_failed_logins_reach_lockout() {
        let (coordinator, clock) = setup(GuardConfig::default());
        let attempt = AuthenticationAttempt {
            identifier: "user@x".into(),
            success: false,
            origin_ip: IP,
            user_agent: "test".into(),
            request_id: None,
        };

        for i in 1..=9 {
            let decision = coordinator.record_authentication(&attempt);
            if i > 3 {
                assert_eq!(
                    decision.denial_kind,
                    Some(DenialKind::RateLimitExceeded(RateWindow::Burst)),
                    "attempt {}",
                    i
                );
            }
            clock.advance(TimeDelta::seconds(1));
        }
        assert_eq!(coordinator.rate_limiter().failure_count("user@x"), 9);

        let tenth = coordinator.record_authentication(&attempt);
        assert!(!tenth.allowed);
        assert_eq!(tenth.denial_kind, Some(DenialKind::BruteForceDetected));
        assert_eq!(tenth.threat_level, Some(ThreatLevel::Critical));
        assert_eq!(tenth.stage, RequestStage::Pending);

        let block = coordinator.store().blocks.active("user@x", clock.now()).unwrap();
        assert_eq!(block.block_type, DenialKind::BruteForceDetected);
        assert_eq!(block.expires_at - clock.now(), TimeDelta::hours(10));

        clock.advance(TimeDelta::seconds(1));
        let eleventh = coordinator.record_authentication(&attempt);
        assert_eq!(eleventh.denial_kind, Some(DenialKind::BruteForceDetected));
    }
}
