//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → clock → block snapshot → audit chain → coordinator
//!
//! Running (maintenance.rs):
//!     every sweep interval → purge expired state → save block snapshot
//!
//! Shutdown (signals.rs → shutdown.rs):
//!     SIGTERM/SIGINT → broadcast → server drains, sweeper saves and exits
//! ```

pub mod maintenance;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
