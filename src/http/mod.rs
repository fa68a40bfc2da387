//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! Business service
//!     → server.rs (Axum setup, request ID, limits)
//!     → handlers.rs (service token, decision / authentication endpoints)
//!     → SecurityCoordinator on the blocking pool
//!     → response.rs (decision JSON, or 401 / 503 errors)
//!
//! Embedded use:
//!     middleware/guard.rs wraps a service's own routes and answers
//!     403 / 429 / 503 before the handler runs.
//! ```

pub mod handlers;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use middleware::{security_guard, GuardState};
pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
