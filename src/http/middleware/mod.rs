//! Middleware for services that embed the guard.

pub mod guard;

pub use guard::{security_guard, GuardState};
