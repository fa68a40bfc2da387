//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, separation of duties)
//!     → GuardConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! Configuration is read once at start. Changing limits or the permission
//! matrix requires a restart, so every decision in a process lifetime is
//! made against the same rules.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, AnomalyConfig, ApiConfig, AuditConfig, AuditFailurePolicy, BruteForceConfig, GuardConfig,
    ListenerConfig, ObservabilityConfig, OperationLimits, PermissionConfig, RateLimitConfig, StateConfig,
    TimeoutConfig,
};
