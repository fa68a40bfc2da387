//! Core request, principal and decision types shared by every check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Staff role as asserted by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Doctor,
    Nurse,
    Receptionist,
    Billing,
    LabTechnician,
    ComplianceOfficer,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Admin,
        Role::Doctor,
        Role::Nurse,
        Role::Receptionist,
        Role::Billing,
        Role::LabTechnician,
        Role::ComplianceOfficer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Doctor => "doctor",
            Self::Nurse => "nurse",
            Self::Receptionist => "receptionist",
            Self::Billing => "billing",
            Self::LabTechnician => "lab_technician",
            Self::ComplianceOfficer => "compliance_officer",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown role: {}", s))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse category of protected data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MedicalRecord,
    Patient,
    Appointment,
    Prescription,
    LabResult,
    Billing,
    Document,
    AuditLog,
    UserAccount,
}

impl ResourceType {
    pub const ALL: [ResourceType; 9] = [
        ResourceType::MedicalRecord,
        ResourceType::Patient,
        ResourceType::Appointment,
        ResourceType::Prescription,
        ResourceType::LabResult,
        ResourceType::Billing,
        ResourceType::Document,
        ResourceType::AuditLog,
        ResourceType::UserAccount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MedicalRecord => "medical_record",
            Self::Patient => "patient",
            Self::Appointment => "appointment",
            Self::Prescription => "prescription",
            Self::LabResult => "lab_result",
            Self::Billing => "billing",
            Self::Document => "document",
            Self::AuditLog => "audit_log",
            Self::UserAccount => "user_account",
        }
    }

    /// Resources holding protected health information.
    pub fn is_clinical(&self) -> bool {
        matches!(
            self,
            Self::MedicalRecord | Self::Prescription | Self::LabResult
        )
    }
}

impl std::str::FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|resource| resource.as_str() == s)
            .ok_or_else(|| format!("unknown resource type: {}", s))
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation a principal wants to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    Create,
    Update,
    Delete,
    Export,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Export => "export",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordinal severity attached to a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated actor. Built once at the boundary from identity-provider data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            display_name: None,
            email: None,
        }
    }
}

/// Per-call transport context handed to individual checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub origin_ip: IpAddr,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Timestamp claimed by the caller; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_timestamp: Option<DateTime<Utc>>,
}

impl RequestContext {
    pub fn new(origin_ip: IpAddr) -> Self {
        Self {
            origin_ip,
            user_agent: String::new(),
            request_id: None,
            client_timestamp: None,
        }
    }
}

/// Inbound question: may `principal` perform `action` on this resource?
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub principal: Principal,
    pub action: Action,
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    pub origin_ip: IpAddr,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AccessRequest {
    pub fn new(principal: Principal, action: Action, resource_type: ResourceType, origin_ip: IpAddr) -> Self {
        Self {
            principal,
            action,
            resource_type,
            resource_id: None,
            subject_id: None,
            origin_ip,
            user_agent: String::new(),
            timestamp: Utc::now(),
            request_id: None,
        }
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_subject_id(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn context(&self) -> RequestContext {
        RequestContext {
            origin_ip: self.origin_ip,
            user_agent: self.user_agent.clone(),
            request_id: self.request_id.clone(),
            client_timestamp: Some(self.timestamp),
        }
    }
}

/// Outcome of a login attempt, reported by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationAttempt {
    /// Login identifier (username or email), not necessarily a principal id.
    pub identifier: String,
    pub success: bool,
    pub origin_ip: IpAddr,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AuthenticationAttempt {
    pub fn context(&self) -> RequestContext {
        RequestContext {
            origin_ip: self.origin_ip,
            user_agent: self.user_agent.clone(),
            request_id: self.request_id.clone(),
            client_timestamp: None,
        }
    }
}

/// Sliding window that a rate-limit denial tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateWindow {
    Burst,
    Minute,
    Hour,
}

impl RateWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Burst => "burst",
            Self::Minute => "minute",
            Self::Hour => "hour",
        }
    }
}

/// Heuristic that flagged an access pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    ResourceVolume,
    MultipleOrigins,
    OffHours,
    SubjectSweep,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceVolume => "resource_volume",
            Self::MultipleOrigins => "multiple_origins",
            Self::OffHours => "off_hours",
            Self::SubjectSweep => "subject_sweep",
        }
    }
}

/// Reason a permission check refused access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationType {
    RoleViolation,
    WriteViolation,
    DeleteViolation,
    DataTypeViolation,
    ExportViolation,
    SubjectViolation,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoleViolation => "ROLE_VIOLATION",
            Self::WriteViolation => "WRITE_VIOLATION",
            Self::DeleteViolation => "DELETE_VIOLATION",
            Self::DataTypeViolation => "DATA_TYPE_VIOLATION",
            Self::ExportViolation => "EXPORT_VIOLATION",
            Self::SubjectViolation => "SUBJECT_VIOLATION",
        }
    }
}

/// Machine-readable denial taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DenialKind {
    RateLimitExceeded(RateWindow),
    BruteForceDetected,
    AnomalyDetected(AnomalyKind),
    PermissionDenied(ViolationType),
    AuditUnavailable,
    InternalError,
}

impl DenialKind {
    /// Stable code such as `rate_limit_exceeded:burst`.
    pub fn code(&self) -> String {
        match self {
            Self::RateLimitExceeded(w) => format!("rate_limit_exceeded:{}", w.as_str()),
            Self::BruteForceDetected => "brute_force_detected".to_string(),
            Self::AnomalyDetected(k) => format!("anomaly_detected:{}", k.as_str()),
            Self::PermissionDenied(v) => format!("permission_denied:{}", v.as_str().to_lowercase()),
            Self::AuditUnavailable => "audit_unavailable".to_string(),
            Self::InternalError => "internal_error".to_string(),
        }
    }
}

impl fmt::Display for DenialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

/// Result of a rate-limit, brute-force or anomaly check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatVerdict {
    pub allowed: bool,
    pub threat_level: ThreatLevel,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial: Option<DenialKind>,
}

impl ThreatVerdict {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            threat_level: ThreatLevel::Low,
            reason: "ok".to_string(),
            denial: None,
        }
    }

    /// Allowed, but worth attention.
    pub fn flagged(threat_level: ThreatLevel, reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            threat_level,
            reason: reason.into(),
            denial: None,
        }
    }

    pub fn deny(kind: DenialKind, threat_level: ThreatLevel, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            threat_level,
            reason: reason.into(),
            denial: Some(kind),
        }
    }

    /// Fail-closed verdict for an internal error. The reason stays generic.
    pub fn fail_closed() -> Self {
        Self::deny(
            DenialKind::InternalError,
            ThreatLevel::High,
            "security check unavailable",
        )
    }
}
