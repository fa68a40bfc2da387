//! Internal error types for the security engine.
//!
//! These never cross the engine boundary: every check converts them into a
//! fail-closed denial before returning.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    /// A configured duration cannot be represented as a time delta.
    #[error("invalid duration for {what}: {secs} seconds")]
    InvalidDuration { what: &'static str, secs: u64 },

    /// No limits are configured for the operation and there is no default.
    #[error("no rate limits configured for operation {0}")]
    UnknownOperation(String),

    /// Timestamp arithmetic left the representable range.
    #[error("timestamp out of range while computing {0}")]
    TimeOutOfRange(&'static str),
}

pub type SecurityResult<T> = Result<T, SecurityError>;

/// Convert a configured number of seconds into a `TimeDelta`.
pub(crate) fn seconds(what: &'static str, secs: u64) -> SecurityResult<chrono::TimeDelta> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::TimeDelta::try_seconds)
        .ok_or(SecurityError::InvalidDuration { what, secs })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_conversion() {
        assert_eq!(seconds("burst", 10).unwrap(), chrono::TimeDelta::seconds(10));
        assert!(matches!(
            seconds("burst", u64::MAX),
            Err(SecurityError::InvalidDuration { what: "burst", .. })
        ));
    }

    #[test]
    fn test_error_display() {
        let err = SecurityError::InvalidDuration { what: "lockout", secs: 7 };
        assert_eq!(err.to_string(), "invalid duration for lockout: 7 seconds");
    }
}
