//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! security / audit / http:
//!     → logging.rs (tracing subscriber, EnvFilter)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! Audit write failures are logged on their own target,
//! `clinic_guard::audit::failure`, so they can be routed separately.

pub mod logging;
pub mod metrics;
