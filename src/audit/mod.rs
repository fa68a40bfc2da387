//! Append-only, tamper-evident audit trail.
//!
//! # Data Flow
//! ```text
//! AuditRecord (caller)
//!     → AuditLog::record (sequence, server timestamp, previous_hash)
//!     → AuditEntry::seal (SHA-256 integrity_hash)
//!     → AuditStore::append (memory or JSON lines)
//! ```
//!
//! Each entry's `previous_hash` is the `integrity_hash` of the entry before
//! it, so `verify()` detects any modified, inserted or removed entry.
//! A failed write never surfaces as an error from `record`; it is escalated
//! on the `clinic_guard::audit::failure` target and the caller receives the
//! `audit-write-failed` sentinel id.

pub mod entry;
pub mod log;
pub mod store;

pub use entry::{AuditEntry, AuditEntryId, AuditRecord, FAILED_ENTRY_ID, GENESIS_HASH};
pub use log::{AuditLog, ChainVerification};
pub use store::{AuditStore, JsonlAuditStore, MemoryAuditStore};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode audit entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("audit store line {line} is not a valid entry: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("last audit entry is not valid: {source}")]
    CorruptTail {
        #[source]
        source: serde_json::Error,
    },

    #[error("audit chain lock poisoned")]
    Poisoned,
}
