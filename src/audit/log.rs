//! The hash-chained audit log.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::entry::{AuditEntry, AuditEntryId, AuditRecord, GENESIS_HASH};
use super::store::{AuditStore, MemoryAuditStore};
use super::AuditError;
use crate::clock::Clock;
use crate::observability::metrics;

/// Tracing target for failed audit writes. Alerting keys off this target.
pub const FAILURE_TARGET: &str = "clinic_guard::audit::failure";

struct ChainHead {
    next_sequence: u64,
    last_hash: String,
}

/// Result of replaying the chain from genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub total_entries: usize,
    pub intact: bool,
    /// Position of the first entry whose digest, sequence or link is wrong.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_invalid: Option<u64>,
}

pub struct AuditLog {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
    head: Mutex<ChainHead>,
    failures: AtomicU64,
}

impl AuditLog {
    /// Open a log over `store`, resuming after its last entry.
    pub fn open(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Result<Self, AuditError> {
        let head = match store.last()? {
            Some(last) => ChainHead {
                next_sequence: last.sequence + 1,
                last_hash: last.integrity_hash,
            },
            None => ChainHead {
                next_sequence: 0,
                last_hash: GENESIS_HASH.to_string(),
            },
        };

        tracing::debug!(next_sequence = head.next_sequence, "Audit chain opened");

        Ok(Self {
            store,
            clock,
            head: Mutex::new(head),
            failures: AtomicU64::new(0),
        })
    }

    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Arc::new(MemoryAuditStore::new()),
            clock,
            head: Mutex::new(ChainHead {
                next_sequence: 0,
                last_hash: GENESIS_HASH.to_string(),
            }),
            failures: AtomicU64::new(0),
        }
    }

    /// Seal and persist one entry. The chain head only advances once the
    /// store has accepted the entry.
    pub fn try_record(&self, record: AuditRecord) -> Result<AuditEntry, AuditError> {
        let mut head = self.head.lock().map_err(|_| AuditError::Poisoned)?;
        let entry = AuditEntry::seal(record, head.next_sequence, self.clock.now(), head.last_hash.clone());
        self.store.append(&entry)?;
        head.next_sequence += 1;
        head.last_hash = entry.integrity_hash.clone();
        Ok(entry)
    }

    /// Record an entry, escalating any failure instead of returning it.
    pub fn record(&self, record: AuditRecord) -> AuditEntryId {
        let principal_id = record.principal_id.clone();
        let action = record.action;
        let resource_type = record.resource_type;

        match self.try_record(record) {
            Ok(entry) => entry.id,
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_audit_failure();
                tracing::error!(
                    target: FAILURE_TARGET,
                    severity = "CRITICAL",
                    principal_id = %principal_id,
                    action = %action,
                    resource_type = %resource_type,
                    error = %err,
                    "Audit write failed"
                );
                AuditEntryId::failed()
            }
        }
    }

    pub fn verify(&self) -> Result<ChainVerification, AuditError> {
        let entries = self.store.load()?;
        let mut expected_previous: &str = GENESIS_HASH;
        let mut first_invalid = None;

        for (position, entry) in entries.iter().enumerate() {
            let position = position as u64;
            if entry.sequence != position || entry.previous_hash != expected_previous || !entry.verify() {
                first_invalid = Some(position);
                break;
            }
            expected_previous = entry.integrity_hash.as_str();
        }

        let verification = ChainVerification {
            total_entries: entries.len(),
            intact: first_invalid.is_none(),
            first_invalid,
        };
        if !verification.intact {
            tracing::error!(
                target: FAILURE_TARGET,
                severity = "CRITICAL",
                first_invalid = ?verification.first_invalid,
                total_entries = verification.total_entries,
                "Audit chain verification failed"
            );
        }
        Ok(verification)
    }

    /// The newest `limit` entries, oldest first. `None` returns everything.
    pub fn entries(&self, limit: Option<usize>) -> Result<Vec<AuditEntry>, AuditError> {
        let mut entries = self.store.load()?;
        if let Some(limit) = limit {
            let skip = entries.len().saturating_sub(limit);
            entries.drain(..skip);
        }
        Ok(entries)
    }

    /// Failed writes since this log was opened.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
