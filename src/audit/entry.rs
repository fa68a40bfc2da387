//! Audit entry types and the integrity digest.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::security::types::{Action, ResourceType};

/// `previous_hash` of the first entry in a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Id handed back when an entry could not be persisted.
pub const FAILED_ENTRY_ID: &str = "audit-write-failed";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditEntryId(String);

impl AuditEntryId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn failed() -> Self {
        Self(FAILED_ENTRY_ID.to_string())
    }

    pub fn is_failed(&self) -> bool {
        self.0 == FAILED_ENTRY_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuditEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a caller asks the log to record. Sequence, time and hashes are
/// assigned by the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub principal_id: String,
    pub action: Action,
    pub resource_type: ResourceType,
    pub resource_id: Option<String>,
    pub subject_id: Option<String>,
    pub origin: String,
    pub legal_basis: Option<String>,
    pub context: serde_json::Value,
}

/// One sealed, immutable audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub principal_id: String,
    pub action: Action,
    pub resource_type: ResourceType,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub subject_id: Option<String>,
    pub origin: String,
    #[serde(default)]
    pub legal_basis: Option<String>,
    pub context: serde_json::Value,
    pub previous_hash: String,
    pub integrity_hash: String,
}

impl AuditEntry {
    pub(crate) fn seal(record: AuditRecord, sequence: u64, timestamp: DateTime<Utc>, previous_hash: String) -> Self {
        let mut entry = Self {
            id: AuditEntryId::generate(),
            sequence,
            timestamp,
            principal_id: record.principal_id,
            action: record.action,
            resource_type: record.resource_type,
            resource_id: record.resource_id,
            subject_id: record.subject_id,
            origin: record.origin,
            legal_basis: record.legal_basis,
            context: record.context,
            previous_hash,
            integrity_hash: String::new(),
        };
        entry.integrity_hash = entry.compute_hash();
        entry
    }

    /// SHA-256 over the length-prefixed fields, in declaration order,
    /// excluding `integrity_hash` itself.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let timestamp = self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true);
        // serde_json::Value objects serialize with sorted keys.
        let context = self.context.to_string();

        put(&mut hasher, self.id.as_str().as_bytes());
        put(&mut hasher, &self.sequence.to_be_bytes());
        put(&mut hasher, timestamp.as_bytes());
        put(&mut hasher, self.principal_id.as_bytes());
        put(&mut hasher, self.action.as_str().as_bytes());
        put(&mut hasher, self.resource_type.as_str().as_bytes());
        put_opt(&mut hasher, self.resource_id.as_deref());
        put_opt(&mut hasher, self.subject_id.as_deref());
        put(&mut hasher, self.origin.as_bytes());
        put_opt(&mut hasher, self.legal_basis.as_deref());
        put(&mut hasher, context.as_bytes());
        put(&mut hasher, self.previous_hash.as_bytes());

        hex::encode(hasher.finalize())
    }

    /// Whether the stored digest matches the entry's contents.
    pub fn verify(&self) -> bool {
        self.compute_hash() == self.integrity_hash
    }
}

fn put(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}

fn put_opt(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update([1u8]);
            put(hasher, v.as_bytes());
        }
        None => hasher.update([0u8]),
    }
}
