//! Sliding-window rate limiting and brute-force tracking.
//!
//! # Check order
//! ```text
//! check_rate_limit(identifier, operation):
//!     active block?           → deny with the stored kind / level
//!     burst window  >= limit  → block (minutes),      deny burst
//!     minute window >= limit  → block (tens of mins), deny minute
//!     hour window   >= limit  → block (hours),        deny hour
//!     otherwise               → record, allow
//! ```
//!
//! The window for one key is read, tested and recorded while holding that
//! key's entry guard, so concurrent bursts cannot lose updates. Guards are
//! dropped before the block table is written.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::schema::{BruteForceConfig, OperationLimits, RateLimitConfig};
use crate::observability::metrics;
use crate::security::blocks::BlockRequest;
use crate::security::error::{seconds, SecurityError, SecurityResult};
use crate::security::store::{RateKey, SecurityStore};
use crate::security::types::{DenialKind, RateWindow, RequestContext, ThreatLevel, ThreatVerdict};

const MINUTE_SECS: u64 = 60;
const HOUR_SECS: u64 = 3600;

/// Threshold that a request tripped.
struct Violation {
    window: RateWindow,
    limit: u32,
    span_secs: u64,
}

/// Rate limiter and brute-force detector over a shared `SecurityStore`.
pub struct RateLimiter {
    limits: RateLimitConfig,
    brute_force: BruteForceConfig,
    store: Arc<SecurityStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(
        limits: RateLimitConfig,
        brute_force: BruteForceConfig,
        store: Arc<SecurityStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            limits,
            brute_force,
            store,
            clock,
        }
    }

    /// Test and record one request for `identifier` under `operation`'s limits.
    pub fn check_rate_limit(&self, identifier: &str, operation: &str, ctx: &RequestContext) -> ThreatVerdict {
        let now = self.clock.now();
        match self.try_check_rate_limit(identifier, operation, now) {
            Ok(verdict) => {
                if !verdict.allowed {
                    tracing::warn!(
                        identifier = %identifier,
                        operation = %operation,
                        origin_ip = %ctx.origin_ip,
                        reason = %verdict.reason,
                        "Rate limit exceeded"
                    );
                }
                verdict
            }
            Err(e) => {
                tracing::error!(identifier = %identifier, operation = %operation, error = %e, "Rate limit check failed; denying");
                ThreatVerdict::fail_closed()
            }
        }
    }

    fn try_check_rate_limit(&self, identifier: &str, operation: &str, now: DateTime<Utc>) -> SecurityResult<ThreatVerdict> {
        if let Some(block) = self.store.blocks.active(identifier, now) {
            return Ok(ThreatVerdict::deny(block.block_type, block.threat_level, block.reason));
        }

        let limits = *self
            .limits
            .limits_for(operation)
            .ok_or_else(|| SecurityError::UnknownOperation(operation.to_string()))?;
        let horizon = seconds("rate limit horizon", limits.window_seconds.max(HOUR_SECS))?;

        let violation = {
            let mut window = self
                .store
                .rate_windows
                .entry(RateKey::new(identifier, operation))
                .or_default();
            window.prune(now, horizon);

            let violation = first_violation(&limits, |span_secs| {
                Ok(window.count_within(now, seconds("rate window", span_secs)?))
            })?;
            if violation.is_none() {
                window.record(now);
            }
            violation
        };

        let Some(violation) = violation else {
            return Ok(ThreatVerdict::allow());
        };

        let (threat_level, block_secs) = match violation.window {
            RateWindow::Burst => (ThreatLevel::Medium, self.limits.burst_block_secs),
            RateWindow::Minute => (ThreatLevel::High, self.limits.minute_block_secs),
            RateWindow::Hour => (ThreatLevel::High, self.limits.hour_block_secs),
        };
        let kind = DenialKind::RateLimitExceeded(violation.window);
        let reason = format!(
            "{} limit of {} requests per {}s exceeded for {}",
            violation.window.as_str(),
            violation.limit,
            violation.span_secs,
            operation
        );
        self.store.blocks.impose(
            identifier,
            BlockRequest {
                block_type: kind,
                reason: reason.clone(),
                threat_level,
                duration: seconds("rate limit block", block_secs)?,
            },
            now,
        );
        metrics::record_rate_limited(violation.window);
        Ok(ThreatVerdict::deny(kind, threat_level, reason))
    }

    /// Track a login outcome for `identifier`.
    ///
    /// Success clears the rolling failure window. Failures accumulate; at the
    /// flag threshold the attempt is allowed but marked HIGH, at the lockout
    /// threshold the identifier is blocked for one hour per failure, capped.
    /// A failure is counted even while another block refuses the attempt.
    pub fn check_brute_force(
        &self,
        identifier: &str,
        operation: &str,
        success: bool,
        ctx: &RequestContext,
    ) -> ThreatVerdict {
        let now = self.clock.now();
        match self.try_check_brute_force(identifier, success, now) {
            Ok(verdict) => {
                if verdict.threat_level >= ThreatLevel::High {
                    tracing::warn!(
                        identifier = %identifier,
                        operation = %operation,
                        origin_ip = %ctx.origin_ip,
                        allowed = verdict.allowed,
                        reason = %verdict.reason,
                        "Repeated authentication failures"
                    );
                }
                verdict
            }
            Err(e) => {
                tracing::error!(identifier = %identifier, operation = %operation, error = %e, "Brute-force check failed; denying");
                ThreatVerdict::fail_closed()
            }
        }
    }

    fn try_check_brute_force(&self, identifier: &str, success: bool, now: DateTime<Utc>) -> SecurityResult<ThreatVerdict> {
        let active = self.store.blocks.active(identifier, now);
        if let Some(block) = active.as_ref().filter(|b| success || b.block_type == DenialKind::BruteForceDetected) {
            return Ok(ThreatVerdict::deny(block.block_type, block.threat_level, block.reason.clone()));
        }

        if success {
            self.store.failures.remove(identifier);
            return Ok(ThreatVerdict::allow());
        }

        // Failures refused by another block still count toward the lockout.
        let horizon = seconds("failure window", self.brute_force.failure_window_secs)?;
        let failures = {
            let mut window = self.store.failures.entry(identifier.to_string()).or_default();
            window.prune(now, horizon);
            window.record(now);
            window.len()
        };
        let failures = u32::try_from(failures).unwrap_or(u32::MAX);

        if failures >= self.brute_force.lockout_threshold {
            let hours = failures.min(self.brute_force.max_lockout_hours);
            let duration = TimeDelta::try_hours(i64::from(hours))
                .ok_or(SecurityError::TimeOutOfRange("lockout duration"))?;
            let reason = format!("{} failed attempts within the last hour; locked for {}h", failures, hours);
            self.store.blocks.impose(
                identifier,
                BlockRequest {
                    block_type: DenialKind::BruteForceDetected,
                    reason: reason.clone(),
                    threat_level: ThreatLevel::Critical,
                    duration,
                },
                now,
            );
            return Ok(ThreatVerdict::deny(
                DenialKind::BruteForceDetected,
                ThreatLevel::Critical,
                reason,
            ));
        }

        if let Some(block) = active {
            return Ok(ThreatVerdict::deny(block.block_type, block.threat_level, block.reason));
        }

        if failures >= self.brute_force.flag_threshold {
            return Ok(ThreatVerdict::flagged(
                ThreatLevel::High,
                format!("{} failed attempts within the last hour", failures),
            ));
        }

        Ok(ThreatVerdict::allow())
    }

    /// Failures currently inside the rolling window for `identifier`.
    pub fn failure_count(&self, identifier: &str) -> usize {
        let now = self.clock.now();
        let Ok(horizon) = seconds("failure window", self.brute_force.failure_window_secs) else {
            return 0;
        };
        self.store
            .failures
            .get(identifier)
            .map(|w| w.count_within(now, horizon))
            .unwrap_or(0)
    }

    /// Largest window any limit reads, for sweeping.
    pub fn horizon(&self) -> TimeDelta {
        let secs = self
            .limits
            .operations
            .values()
            .map(|l| l.window_seconds)
            .max()
            .unwrap_or(0)
            .max(HOUR_SECS);
        seconds("rate limit horizon", secs).unwrap_or(TimeDelta::hours(1))
    }

    pub fn failure_horizon(&self) -> TimeDelta {
        seconds("failure window", self.brute_force.failure_window_secs).unwrap_or(TimeDelta::hours(1))
    }
}

/// Burst, then minute, then hour: the first window already at its limit.
fn first_violation(
    limits: &OperationLimits,
    mut count: impl FnMut(u64) -> SecurityResult<usize>,
) -> SecurityResult<Option<Violation>> {
    let checks = [
        (RateWindow::Burst, limits.burst_limit, limits.window_seconds),
        (RateWindow::Minute, limits.per_minute, MINUTE_SECS),
        (RateWindow::Hour, limits.per_hour, HOUR_SECS),
    ];
    for (window, limit, span_secs) in checks {
        if count(span_secs)? >= limit as usize {
            return Ok(Some(Violation {
                window,
                limit,
                span_secs,
            }));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr};

    fn ctx() -> RequestContext {
        RequestContext::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)))
    }

    fn setup(limits: OperationLimits) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 4, 8, 14, 0, 0).unwrap()));
        let config = RateLimitConfig {
            operations: HashMap::from([("default".to_string(), limits)]),
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(
            config,
            BruteForceConfig::default(),
            Arc::new(SecurityStore::new()),
            clock.clone(),
        );
        (limiter, clock)
    }

    #[test]
    fn test_burst_limit_denies_excess() {
        let (limiter, _clock) = setup(OperationLimits::new(5, 30, 500, 10));
        for _ in 0..5 {
            assert!(limiter.check_rate_limit("u1", "medical_access", &ctx()).allowed);
        }
        let verdict = limiter.check_rate_limit("u1", "medical_access", &ctx());
        assert!(!verdict.allowed);
        assert_eq!(verdict.denial, Some(DenialKind::RateLimitExceeded(RateWindow::Burst)));
        assert_eq!(verdict.threat_level, ThreatLevel::Medium);
    }

    #[test]
    fn test_blocked_identifier_denied_with_stored_reason() {
        let (limiter, clock) = setup(OperationLimits::new(1, 30, 500, 10));
        assert!(limiter.check_rate_limit("u1", "api", &ctx()).allowed);
        let first = limiter.check_rate_limit("u1", "api", &ctx());
        assert!(!first.allowed);

        // Burst window has passed, but the block (5 minutes) still holds.
        clock.advance(TimeDelta::seconds(30));
        let blocked = limiter.check_rate_limit("u1", "api", &ctx());
        assert!(!blocked.allowed);
        assert_eq!(blocked.reason, first.reason);

        // Eligible again after the block expires.
        clock.advance(TimeDelta::minutes(5));
        assert!(limiter.check_rate_limit("u1", "api", &ctx()).allowed);
    }

    #[test]
    fn test_minute_limit_checked_after_burst() {
        let (limiter, clock) = setup(OperationLimits::new(3, 4, 500, 5));
        for _ in 0..4 {
            assert!(limiter.check_rate_limit("u1", "api", &ctx()).allowed);
            clock.advance(TimeDelta::seconds(6));
        }
        let verdict = limiter.check_rate_limit("u1", "api", &ctx());
        assert_eq!(verdict.denial, Some(DenialKind::RateLimitExceeded(RateWindow::Minute)));
        assert_eq!(verdict.threat_level, ThreatLevel::High);
    }

    #[test]
    fn test_identifiers_are_independent() {
        let (limiter, _clock) = setup(OperationLimits::new(1, 30, 500, 10));
        assert!(limiter.check_rate_limit("u1", "api", &ctx()).allowed);
        assert!(limiter.check_rate_limit("u2", "api", &ctx()).allowed);
        assert!(limiter.check_rate_limit("u1", "login", &ctx()).allowed);
    }

    #[test]
    fn test_brute_force_flag_then_lockout() {
        let (limiter, clock) = setup(OperationLimits::new(100, 100, 1000, 10));
        for i in 1..=9 {
            let verdict = limiter.check_brute_force("user@x", "login", false, &ctx());
            assert!(verdict.allowed, "failure {} should not lock out", i);
            if i >= 5 {
                assert_eq!(verdict.threat_level, ThreatLevel::High);
            } else {
                assert_eq!(verdict.threat_level, ThreatLevel::Low);
            }
            clock.advance(TimeDelta::minutes(1));
        }

        let tenth = limiter.check_brute_force("user@x", "login", false, &ctx());
        assert!(!tenth.allowed);
        assert_eq!(tenth.denial, Some(DenialKind::BruteForceDetected));
        assert_eq!(tenth.threat_level, ThreatLevel::Critical);

        let block = limiter.store.blocks.active("user@x", clock.now()).unwrap();
        assert_eq!(block.expires_at - block.blocked_at, TimeDelta::hours(10));

        // Even a correct password is refused while locked out.
        assert!(!limiter.check_brute_force("user@x", "login", true, &ctx()).allowed);
    }

    #[test]
    fn test_success_resets_failures() {
        let (limiter, _clock) = setup(OperationLimits::new(100, 100, 1000, 10));
        for _ in 0..4 {
            limiter.check_brute_force("user@x", "login", false, &ctx());
        }
        assert_eq!(limiter.failure_count("user@x"), 4);
        assert!(limiter.check_brute_force("user@x", "login", true, &ctx()).allowed);
        assert_eq!(limiter.failure_count("user@x"), 0);
    }

    #[test]
    fn test_failures_roll_off_after_an_hour() {
        let (limiter, clock) = setup(OperationLimits::new(100, 100, 1000, 10));
        for _ in 0..6 {
            limiter.check_brute_force("user@x", "login", false, &ctx());
        }
        clock.advance(TimeDelta::minutes(61));
        let verdict = limiter.check_brute_force("user@x", "login", false, &ctx());
        assert_eq!(verdict.threat_level, ThreatLevel::Low);
        assert_eq!(limiter.failure_count("user@x"), 1);
    }

    #[test]
    fn test_missing_operation_config_fails_closed() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = RateLimitConfig {
            operations: HashMap::new(),
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(config, BruteForceConfig::default(), Arc::new(SecurityStore::new()), clock);
        let verdict = limiter.check_rate_limit("u1", "api", &ctx());
        assert!(!verdict.allowed);
        assert_eq!(verdict.denial, Some(DenialKind::InternalError));
    }

    #[test]
    fn test_failures_count_while_rate_blocked() {
        let (limiter, clock) = setup(OperationLimits::new(3, 5, 20, 10));
        for i in 1..=10 {
            let rate = limiter.check_rate_limit("user@x", "login", &ctx());
            let verdict = limiter.check_brute_force("user@x", "login", false, &ctx());
            if i <= 3 {
                assert!(rate.allowed);
            } else if i < 10 {
                assert!(!verdict.allowed, "attempt {} should stay refused", i);
                assert_eq!(verdict.denial, rate.denial);
            } else {
                assert_eq!(verdict.denial, Some(DenialKind::BruteForceDetected));
                assert_eq!(verdict.threat_level, ThreatLevel::Critical);
            }
            clock.advance(TimeDelta::seconds(1));
        }
        assert_eq!(limiter.failure_count("user@x"), 10);

        let block = limiter.store.blocks.active("user@x", clock.now()).unwrap();
        assert_eq!(block.block_type, DenialKind::BruteForceDetected);
        assert_eq!(block.threat_level, ThreatLevel::Critical);
        assert!(block.expires_at >= clock.now() + TimeDelta::hours(9));
    }
}
