//! Role × resource permission matrix and decision logic.
//!
//! Decisions are a pure function of the principal's role, the resource type
//! and the action: nothing supplied with the request beyond those three can
//! widen access. Exports take a stricter path with its own role list.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::audit::{AuditEntryId, AuditLog, AuditRecord};
use crate::config::schema::PermissionConfig;
use crate::security::types::{Action, Principal, RequestContext, ResourceType, Role, ViolationType};

/// Access granted to a role on a resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    #[default]
    None,
    Read,
    Write,
    Full,
}

impl PermissionLevel {
    /// Level an action requires. Exports are handled separately.
    pub fn required_for(action: Action) -> PermissionLevel {
        match action {
            Action::Read | Action::Export => PermissionLevel::Read,
            Action::Write | Action::Create | Action::Update => PermissionLevel::Write,
            Action::Delete => PermissionLevel::Full,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Read => "read",
            Self::Write => "write",
            Self::Full => "full",
        }
    }
}

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDecision {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation_type: Option<ViolationType>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_basis: Option<String>,
}

impl PermissionDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            violation_type: None,
            reason: reason.into(),
            legal_basis: None,
        }
    }

    fn deny(violation: ViolationType, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            violation_type: Some(violation),
            reason: reason.into(),
            legal_basis: None,
        }
    }

    fn with_legal_basis(mut self, legal_basis: &str) -> Self {
        self.legal_basis = Some(legal_basis.to_string());
        self
    }
}

/// Static role × resource matrix. Missing cells mean `none`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionMatrix {
    grants: HashMap<Role, HashMap<ResourceType, PermissionLevel>>,
}

impl PermissionMatrix {
    /// Least-privilege defaults for a small clinic.
    pub fn builtin() -> Self {
        use PermissionLevel::{Full, Read, Write};
        use ResourceType::*;

        let rows: [(Role, &[(ResourceType, PermissionLevel)]); 7] = [
            (
                Role::Admin,
                &[
                    (Patient, Full),
                    (Appointment, Full),
                    (Document, Full),
                    (Billing, Full),
                    (UserAccount, Full),
                    (AuditLog, Read),
                    (MedicalRecord, Read),
                ],
            ),
            (
                Role::Doctor,
                &[
                    (MedicalRecord, Full),
                    (Prescription, Full),
                    (LabResult, Write),
                    (Patient, Write),
                    (Appointment, Write),
                    (Document, Write),
                ],
            ),
            (
                Role::Nurse,
                &[
                    (MedicalRecord, Write),
                    (Prescription, Read),
                    (LabResult, Read),
                    (Patient, Write),
                    (Appointment, Write),
                    (Document, Read),
                ],
            ),
            (
                Role::Receptionist,
                &[
                    (Patient, Write),
                    (Appointment, Full),
                    (Document, Read),
                    (Billing, Read),
                ],
            ),
            (
                Role::Billing,
                &[
                    (Billing, Full),
                    (Patient, Read),
                    (Appointment, Read),
                    (Document, Read),
                ],
            ),
            (
                Role::LabTechnician,
                &[
                    (LabResult, Write),
                    (MedicalRecord, Read),
                    (Patient, Read),
                ],
            ),
            (
                Role::ComplianceOfficer,
                &[
                    (AuditLog, Read),
                    (UserAccount, Read),
                ],
            ),
        ];

        let grants = rows
            .into_iter()
            .map(|(role, cells)| (role, cells.iter().copied().collect()))
            .collect();
        Self { grants }
    }

    /// Built-in matrix with configured rows replacing whole roles.
    pub fn from_config(config: &PermissionConfig) -> Result<Self, String> {
        let mut matrix = Self::builtin();
        for (role_name, row) in &config.matrix {
            let role: Role = role_name.parse()?;
            let mut cells = HashMap::new();
            for (resource_name, level) in row {
                let resource: ResourceType = resource_name.parse()?;
                cells.insert(resource, *level);
            }
            matrix.grants.insert(role, cells);
        }
        Ok(matrix)
    }

    pub fn level(&self, role: Role, resource: ResourceType) -> PermissionLevel {
        self.grants
            .get(&role)
            .and_then(|row| row.get(&resource))
            .copied()
            .unwrap_or_default()
    }
}

/// Extension point for per-subject restrictions (care-team membership,
/// consent withdrawal, VIP flags). Returns a denial reason to refuse.
pub trait SubjectAccessPolicy: Send + Sync {
    fn check(&self, principal: &Principal, action: Action, resource_type: ResourceType, subject_id: &str) -> Option<String>;
}

/// Default policy: no per-subject restriction beyond the matrix.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermitAllSubjects;

impl SubjectAccessPolicy for PermitAllSubjects {
    fn check(&self, _: &Principal, _: Action, _: ResourceType, _: &str) -> Option<String> {
        None
    }
}

pub struct PermissionValidator {
    matrix: PermissionMatrix,
    export_roles: Vec<Role>,
    exportable_resources: Vec<ResourceType>,
    export_legal_basis: String,
    subject_policy: Arc<dyn SubjectAccessPolicy>,
}

impl PermissionValidator {
    pub fn new(matrix: PermissionMatrix, config: &PermissionConfig) -> Self {
        Self {
            matrix,
            export_roles: config.export_roles.clone(),
            exportable_resources: config.exportable_resources.clone(),
            export_legal_basis: config.export_legal_basis.clone(),
            subject_policy: Arc::new(PermitAllSubjects),
        }
    }

    /// Replace the per-subject hook.
    pub fn with_subject_policy(mut self, policy: Arc<dyn SubjectAccessPolicy>) -> Self {
        self.subject_policy = policy;
        self
    }

    pub fn matrix(&self) -> &PermissionMatrix {
        &self.matrix
    }

    /// Decide whether `principal` may perform `action` on the resource.
    pub fn validate(
        &self,
        principal: &Principal,
        action: Action,
        resource_type: ResourceType,
        resource_id: Option<&str>,
        subject_id: Option<&str>,
    ) -> PermissionDecision {
        let decision = if action == Action::Export {
            self.validate_export(principal, resource_type)
        } else {
            self.validate_matrix(principal, action, resource_type)
        };

        let decision = match (decision.allowed, subject_id) {
            (true, Some(subject)) => match self.subject_policy.check(principal, action, resource_type, subject) {
                Some(reason) => PermissionDecision {
                    legal_basis: decision.legal_basis,
                    ..PermissionDecision::deny(ViolationType::SubjectViolation, reason)
                },
                None => decision,
            },
            _ => decision,
        };

        if !decision.allowed {
            tracing::info!(
                principal_id = %principal.id,
                role = %principal.role,
                action = %action,
                resource_type = %resource_type,
                resource_id = resource_id.unwrap_or("-"),
                violation = decision.violation_type.map(|v| v.as_str()).unwrap_or("-"),
                "Permission denied"
            );
        }
        decision
    }

    fn validate_matrix(&self, principal: &Principal, action: Action, resource_type: ResourceType) -> PermissionDecision {
        let required = PermissionLevel::required_for(action);
        let granted = self.matrix.level(principal.role, resource_type);
        if granted >= required {
            return PermissionDecision::allow(format!(
                "{} holds {} on {}",
                principal.role,
                granted.as_str(),
                resource_type
            ));
        }

        let violation = match required {
            PermissionLevel::Full => ViolationType::DeleteViolation,
            PermissionLevel::Write => ViolationType::WriteViolation,
            PermissionLevel::Read | PermissionLevel::None => ViolationType::RoleViolation,
        };
        PermissionDecision::deny(
            violation,
            format!(
                "{} requires {} on {}; {} holds {}",
                action,
                required.as_str(),
                resource_type,
                principal.role,
                granted.as_str()
            ),
        )
    }

    fn validate_export(&self, principal: &Principal, resource_type: ResourceType) -> PermissionDecision {
        let decision = if !self.export_roles.contains(&principal.role) {
            PermissionDecision::deny(
                ViolationType::ExportViolation,
                format!("{} may not export data", principal.role),
            )
        } else if !self.exportable_resources.contains(&resource_type) {
            PermissionDecision::deny(
                ViolationType::DataTypeViolation,
                format!("{} is not an exportable data type", resource_type),
            )
        } else if self.matrix.level(principal.role, resource_type) < PermissionLevel::Read {
            PermissionDecision::deny(
                ViolationType::RoleViolation,
                format!("{} holds no access on {}", principal.role, resource_type),
            )
        } else {
            PermissionDecision::allow(format!("{} export of {} permitted", principal.role, resource_type))
        };
        decision.with_legal_basis(&self.export_legal_basis)
    }

    /// Validate outside the coordinator and record the outcome, allowed or
    /// denied, in the audit trail.
    #[allow(clippy::too_many_arguments)]
    pub fn validate_and_audit(
        &self,
        audit: &AuditLog,
        principal: &Principal,
        action: Action,
        resource_type: ResourceType,
        resource_id: Option<&str>,
        subject_id: Option<&str>,
        ctx: &RequestContext,
    ) -> (PermissionDecision, AuditEntryId) {
        let decision = self.validate(principal, action, resource_type, resource_id, subject_id);
        let record = AuditRecord {
            principal_id: principal.id.clone(),
            action,
            resource_type,
            resource_id: resource_id.map(str::to_string),
            subject_id: subject_id.map(str::to_string),
            origin: ctx.origin_ip.to_string(),
            legal_basis: decision.legal_basis.clone(),
            context: serde_json::json!({
                "stage": "permission",
                "allowed": decision.allowed,
                "violation_type": decision.violation_type,
                "reason": decision.reason,
                "role": principal.role,
                "user_agent": ctx.user_agent,
                "request_id": ctx.request_id,
            }),
        };
        let entry_id = audit.record(record);
        (decision, entry_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> PermissionValidator {
        PermissionValidator::new(PermissionMatrix::builtin(), &PermissionConfig::default())
    }

    fn check(role: Role, action: Action, resource: ResourceType) -> PermissionDecision {
        validator().validate(&Principal::new("p1", role), action, resource, None, None)
    }

    #[test]
    fn test_receptionist_cannot_write_medical_record() {
        let decision = check(Role::Receptionist, Action::Write, ResourceType::MedicalRecord);
        assert!(!decision.allowed);
        assert_eq!(decision.violation_type, Some(ViolationType::WriteViolation));
    }

    #[test]
    fn test_violation_type_follows_required_level() {
        let read = check(Role::Billing, Action::Read, ResourceType::MedicalRecord);
        assert_eq!(read.violation_type, Some(ViolationType::RoleViolation));

        let delete = check(Role::Nurse, Action::Delete, ResourceType::MedicalRecord);
        assert_eq!(delete.violation_type, Some(ViolationType::DeleteViolation));

        let update = check(Role::LabTechnician, Action::Update, ResourceType::MedicalRecord);
        assert_eq!(update.violation_type, Some(ViolationType::WriteViolation));
    }

    #[test]
    fn test_clinical_roles_allowed() {
        assert!(check(Role::Doctor, Action::Delete, ResourceType::MedicalRecord).allowed);
        assert!(check(Role::Nurse, Action::Update, ResourceType::MedicalRecord).allowed);
        assert!(check(Role::Receptionist, Action::Create, ResourceType::Appointment).allowed);
    }

    #[test]
    fn test_billing_never_writes_clinical_data() {
        let matrix = PermissionMatrix::builtin();
        for resource in ResourceType::ALL.into_iter().filter(|r| r.is_clinical()) {
            assert!(matrix.level(Role::Billing, resource) <= PermissionLevel::Read);
        }
    }

    #[test]
    fn test_decisions_are_deterministic() {
        let v = validator();
        let principal = Principal::new("p1", Role::Nurse);
        for resource in ResourceType::ALL {
            let a = v.validate(&principal, Action::Update, resource, Some("r1"), None);
            let b = v.validate(&principal, Action::Update, resource, Some("r2"), None);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_export_path() {
        let denied = check(Role::Nurse, Action::Export, ResourceType::MedicalRecord);
        assert_eq!(denied.violation_type, Some(ViolationType::ExportViolation));
        assert!(denied.legal_basis.is_some());

        let wrong_type = check(Role::Doctor, Action::Export, ResourceType::Billing);
        assert_eq!(wrong_type.violation_type, Some(ViolationType::DataTypeViolation));

        let allowed = check(Role::Doctor, Action::Export, ResourceType::MedicalRecord);
        assert!(allowed.allowed);
        assert_eq!(
            allowed.legal_basis.as_deref(),
            Some(PermissionConfig::default().export_legal_basis.as_str())
        );
    }

    #[test]
    fn test_validate_and_audit_records_each_outcome() {
        use crate::clock::SystemClock;
        use std::net::{IpAddr, Ipv4Addr};

        let audit = AuditLog::in_memory(Arc::new(SystemClock));
        let ctx = RequestContext::new(IpAddr::V4(Ipv4Addr::new(172, 16, 0, 4)));
        let v = validator();

        let (denied, denied_id) = v.validate_and_audit(
            &audit,
            &Principal::new("rec-1", Role::Receptionist),
            Action::Write,
            ResourceType::MedicalRecord,
            Some("mr-1"),
            None,
            &ctx,
        );
        let (allowed, allowed_id) = v.validate_and_audit(
            &audit,
            &Principal::new("dr-1", Role::Doctor),
            Action::Read,
            ResourceType::MedicalRecord,
            Some("mr-1"),
            Some("patient-1"),
            &ctx,
        );
        assert!(!denied.allowed);
        assert!(allowed.allowed);

        let entries = audit.entries(None).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, denied_id);
        assert_eq!(entries[0].context["violation_type"], "WRITE_VIOLATION");
        assert_eq!(entries[1].id, allowed_id);
        assert_eq!(entries[1].origin, "172.16.0.4");
    }

    struct DenySubject(&'static str);

    impl SubjectAccessPolicy for DenySubject {
        fn check(&self, _: &Principal, _: Action, _: ResourceType, subject_id: &str) -> Option<String> {
            (subject_id == self.0).then(|| "subject restricted".to_string())
        }
    }

    #[test]
    fn test_subject_policy_hook() {
        let v = validator().with_subject_policy(Arc::new(DenySubject("vip-1")));
        let doctor = Principal::new("d1", Role::Doctor);
        let denied = v.validate(&doctor, Action::Read, ResourceType::MedicalRecord, None, Some("vip-1"));
        assert_eq!(denied.violation_type, Some(ViolationType::SubjectViolation));

        let allowed = v.validate(&doctor, Action::Read, ResourceType::MedicalRecord, None, Some("p-2"));
        assert!(allowed.allowed);
    }

    #[test]
    fn test_config_row_replaces_builtin() {
        let mut config = PermissionConfig::default();
        config
            .matrix
            .insert("nurse".into(), HashMap::from([("medical_record".to_string(), PermissionLevel::Read)]));
        let matrix = PermissionMatrix::from_config(&config).unwrap();
        assert_eq!(matrix.level(Role::Nurse, ResourceType::MedicalRecord), PermissionLevel::Read);
        assert_eq!(matrix.level(Role::Nurse, ResourceType::Patient), PermissionLevel::None);

        config.matrix.insert("janitor".into(), HashMap::new());
        assert!(PermissionMatrix::from_config(&config).is_err());
    }
}
