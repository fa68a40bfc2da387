//! Access-pattern anomaly detection.
//!
//! Every observed access is appended to the principal's rolling history,
//! then the heuristics run in a fixed order. The first one that fires blocks
//! the principal for a duration proportional to its severity.
//!
//! | # | Heuristic        | Default trigger                             | Level    |
//! |---|------------------|---------------------------------------------|----------|
//! | 1 | resource volume  | > 50 same-resource-type accesses in 1h      | CRITICAL |
//! | 2 | multiple origins | > 3 distinct origin IPs in 1h               | HIGH     |
//! | 3 | off hours        | > 10 accesses in [23:00, 06:00) within 8h   | MEDIUM   |
//! | 4 | subject sweep    | > 20 distinct subjects in 30min             | HIGH     |

use chrono::{DateTime, FixedOffset, Offset, TimeDelta, Timelike, Utc};
use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::schema::AnomalyConfig;
use crate::security::blocks::BlockRequest;
use crate::security::error::{seconds, SecurityResult};
use crate::security::store::SecurityStore;
use crate::security::types::{AccessRequest, AnomalyKind, DenialKind, ResourceType, ThreatLevel, ThreatVerdict};
use crate::security::window::cutoff;

/// One entry of a principal's access history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEvent {
    pub timestamp: DateTime<Utc>,
    pub resource_type: ResourceType,
    pub resource_id: Option<String>,
    pub subject_id: Option<String>,
    pub origin_ip: IpAddr,
}

struct Finding {
    kind: AnomalyKind,
    level: ThreatLevel,
    reason: String,
}

pub struct ThreatDetector {
    config: AnomalyConfig,
    local_offset: FixedOffset,
    store: Arc<SecurityStore>,
    clock: Arc<dyn Clock>,
}

impl ThreatDetector {
    pub fn new(config: AnomalyConfig, store: Arc<SecurityStore>, clock: Arc<dyn Clock>) -> Self {
        // Validation rejects offsets outside ±24h; UTC is the fallback.
        let local_offset = config
            .utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        Self {
            config,
            local_offset,
            store,
            clock,
        }
    }

    /// Record the access and evaluate the heuristics. Never panics into the
    /// caller; internal errors deny.
    pub fn detect_anomaly(&self, request: &AccessRequest) -> ThreatVerdict {
        let now = self.clock.now();
        match self.evaluate(request, now) {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::error!(
                    principal_id = %request.principal.id,
                    error = %e,
                    "Anomaly detection failed; denying"
                );
                ThreatVerdict::fail_closed()
            }
        }
    }

    fn evaluate(&self, request: &AccessRequest, now: DateTime<Utc>) -> SecurityResult<ThreatVerdict> {
        let principal_id = request.principal.id.as_str();
        let retention = seconds("access history", self.config.history_secs)?;

        let finding = {
            let mut history = self
                .store
                .access_history
                .entry(principal_id.to_string())
                .or_default();
            let timestamp = history.back().map_or(now, |last| last.timestamp.max(now));
            history.push_back(AccessEvent {
                timestamp,
                resource_type: request.resource_type,
                resource_id: request.resource_id.clone(),
                subject_id: request.subject_id.clone(),
                origin_ip: request.origin_ip,
            });
            let oldest = cutoff(now, retention);
            while history.front().is_some_and(|e| e.timestamp < oldest) {
                history.pop_front();
            }
            self.first_finding(&history, request.resource_type, now)?
        };

        let Some(finding) = finding else {
            return Ok(ThreatVerdict::allow());
        };

        let block_secs = match finding.level {
            ThreatLevel::Critical => self.config.critical_block_secs,
            ThreatLevel::High => self.config.high_block_secs,
            ThreatLevel::Medium | ThreatLevel::Low => self.config.medium_block_secs,
        };
        let kind = DenialKind::AnomalyDetected(finding.kind);
        self.store.blocks.impose(
            principal_id,
            BlockRequest {
                block_type: kind,
                reason: finding.reason.clone(),
                threat_level: finding.level,
                duration: seconds("anomaly block", block_secs)?,
            },
            now,
        );
        tracing::warn!(
            principal_id = %principal_id,
            anomaly = finding.kind.as_str(),
            threat_level = %finding.level,
            origin_ip = %request.origin_ip,
            reason = %finding.reason,
            "Access anomaly detected"
        );
        Ok(ThreatVerdict::deny(kind, finding.level, finding.reason))
    }

    fn first_finding(
        &self,
        history: &VecDeque<AccessEvent>,
        resource_type: ResourceType,
        now: DateTime<Utc>,
    ) -> SecurityResult<Option<Finding>> {
        let c = &self.config;

        let volume = within(history, now, seconds("volume window", c.volume_window_secs)?)
            .filter(|e| e.resource_type == resource_type)
            .count();
        if volume > c.max_resource_accesses as usize {
            return Ok(Some(Finding {
                kind: AnomalyKind::ResourceVolume,
                level: ThreatLevel::Critical,
                reason: format!(
                    "{} {} accesses within {}s",
                    volume, resource_type, c.volume_window_secs
                ),
            }));
        }

        let origins: HashSet<IpAddr> = within(history, now, seconds("origin window", c.origin_window_secs)?)
            .map(|e| e.origin_ip)
            .collect();
        if origins.len() > c.max_distinct_origins as usize {
            return Ok(Some(Finding {
                kind: AnomalyKind::MultipleOrigins,
                level: ThreatLevel::High,
                reason: format!(
                    "{} distinct origin addresses within {}s",
                    origins.len(),
                    c.origin_window_secs
                ),
            }));
        }

        let off_hours = within(history, now, seconds("off-hours window", c.off_hours_window_secs)?)
            .filter(|e| self.is_off_hours(e.timestamp))
            .count();
        if off_hours > c.max_off_hours_accesses as usize {
            return Ok(Some(Finding {
                kind: AnomalyKind::OffHours,
                level: ThreatLevel::Medium,
                reason: format!(
                    "{} accesses between {:02}:00 and {:02}:00 within {}s",
                    off_hours, c.off_hours_start, c.off_hours_end, c.off_hours_window_secs
                ),
            }));
        }

        let subjects: HashSet<&str> = within(history, now, seconds("subject window", c.subject_window_secs)?)
            .filter_map(|e| e.subject_id.as_deref())
            .collect();
        if subjects.len() > c.max_distinct_subjects as usize {
            return Ok(Some(Finding {
                kind: AnomalyKind::SubjectSweep,
                level: ThreatLevel::High,
                reason: format!(
                    "{} distinct subjects within {}s",
                    subjects.len(),
                    c.subject_window_secs
                ),
            }));
        }

        Ok(None)
    }

    /// Whether the local hour of `at` falls in the off-hours range, which may
    /// wrap midnight.
    fn is_off_hours(&self, at: DateTime<Utc>) -> bool {
        let hour = at.with_timezone(&self.local_offset).hour();
        let (start, end) = (self.config.off_hours_start, self.config.off_hours_end);
        if start <= end {
            hour >= start && hour < end
        } else {
            hour >= start || hour < end
        }
    }

    /// Events recorded for `principal_id` that are still retained.
    pub fn history_len(&self, principal_id: &str) -> usize {
        self.store
            .access_history
            .get(principal_id)
            .map(|h| h.len())
            .unwrap_or(0)
    }

    pub fn horizon(&self) -> TimeDelta {
        seconds("access history", self.config.history_secs).unwrap_or(TimeDelta::hours(24))
    }
}

/// Events of `history` newer than `now - span`, newest first.
fn within(
    history: &VecDeque<AccessEvent>,
    now: DateTime<Utc>,
    span: TimeDelta,
) -> impl Iterator<Item = &AccessEvent> {
    let since = cutoff(now, span);
    history.iter().rev().take_while(move |e| e.timestamp >= since)
}
