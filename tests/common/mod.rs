//! Shared fixtures for integration tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use clinic_guard::audit::AuditLog;
use clinic_guard::clock::ManualClock;
use clinic_guard::config::GuardConfig;
use clinic_guard::http::AppState;
use clinic_guard::lifecycle::startup::build_state_with_clock;
use clinic_guard::security::{AccessRequest, Action, Principal, ResourceType, Role, SecurityCoordinator, SecurityStore};

pub const SERVICE_TOKEN: &str = "service-token-for-tests";
pub const ADMIN_KEY: &str = "admin-key-for-tests";

/// Tuesday morning, inside working hours.
pub fn working_hours() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 9, 10, 0, 0).unwrap()
}

pub fn ip(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 20, 0, last))
}

pub struct Engine {
    pub coordinator: Arc<SecurityCoordinator>,
    pub clock: Arc<ManualClock>,
}

pub fn engine_at(config: GuardConfig, start: DateTime<Utc>) -> Engine {
    let clock = Arc::new(ManualClock::new(start));
    let audit = Arc::new(AuditLog::in_memory(clock.clone()));
    let coordinator = SecurityCoordinator::from_config(&config, Arc::new(SecurityStore::new()), audit, clock.clone())
        .expect("valid permission matrix");
    Engine {
        coordinator: Arc::new(coordinator),
        clock,
    }
}

pub fn engine() -> Engine {
    engine_at(GuardConfig::default(), working_hours())
}

pub fn access(principal_id: &str, role: Role, action: Action, resource: ResourceType) -> AccessRequest {
    AccessRequest::new(Principal::new(principal_id, role), action, resource, ip(1)).with_user_agent("integration-test")
}

/// Config with both HTTP surfaces enabled.
pub fn http_config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.api.service_token = SERVICE_TOKEN.to_string();
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.to_string();
    config
}

pub fn app_state(config: GuardConfig) -> (AppState, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(working_hours()));
    let state = build_state_with_clock(config, clock.clone()).expect("state builds");
    (state, clock)
}
