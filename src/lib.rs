//! Access security engine for clinic systems holding medical data.

pub mod admin;
pub mod audit;
pub mod clock;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::GuardConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use security::{SecurityCoordinator, SecurityDecision};
