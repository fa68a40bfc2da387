//! Security engine.
//!
//! # Data Flow
//! ```text
//! AccessRequest:
//!     → coordinator.rs (fixed-order pipeline)
//!         → rate_limit.rs  (sliding windows per identifier × operation)
//!         → permissions.rs (role × resource matrix, export rules)
//!         → threat.rs      (access-pattern heuristics)
//!     → audit (one hash-chained entry per decision)
//!
//! Shared state:
//!     store.rs  (windows, failures, histories)
//!     blocks.rs (time-bounded blocks, honored by every check)
//! ```
//!
//! Every check fails closed: an internal error becomes a denial with a
//! generic reason, and the detail goes to the log.

pub mod blocks;
pub mod coordinator;
pub mod error;
pub mod permissions;
pub mod rate_limit;
pub mod store;
pub mod threat;
pub mod types;
pub mod window;

pub use blocks::{BlockTable, SecurityBlock};
pub use coordinator::{RequestStage, SecurityCoordinator, SecurityDecision};
pub use error::{SecurityError, SecurityResult};
pub use permissions::{PermissionDecision, PermissionLevel, PermissionMatrix, PermissionValidator};
pub use rate_limit::RateLimiter;
pub use store::SecurityStore;
pub use threat::ThreatDetector;
pub use types::*;
