//! Process-wide mutable security state.
//!
//! One `SecurityStore` is built at startup and shared by `Arc` with every
//! component that reads or mutates windows, histories or blocks. Each map is
//! a `DashMap`, so mutation of one key happens under that key's shard lock.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

use crate::security::blocks::BlockTable;
use crate::security::threat::AccessEvent;
use crate::security::window::{cutoff, SlidingWindow};

/// Key of a rate-limit window: identifier × operation type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    pub identifier: String,
    pub operation: String,
}

impl RateKey {
    pub fn new(identifier: &str, operation: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            operation: operation.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SecurityStore {
    pub blocks: BlockTable,
    pub(crate) rate_windows: DashMap<RateKey, SlidingWindow>,
    pub(crate) failures: DashMap<String, SlidingWindow>,
    pub(crate) access_history: DashMap<String, VecDeque<AccessEvent>>,
}

/// Counts reported by a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_blocks: usize,
    pub idle_windows: usize,
    pub idle_histories: usize,
}

impl SecurityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store around a previously persisted block table.
    pub fn with_blocks(blocks: BlockTable) -> Self {
        Self {
            blocks,
            ..Self::default()
        }
    }

    /// Drop expired blocks and keys with no events inside their horizons.
    pub fn sweep(
        &self,
        now: DateTime<Utc>,
        rate_horizon: TimeDelta,
        failure_horizon: TimeDelta,
        history_horizon: TimeDelta,
    ) -> SweepReport {
        let expired_blocks = self.blocks.purge_expired(now);

        let windows_before = self.rate_windows.len() + self.failures.len();
        self.rate_windows.retain(|_, window| {
            window.prune(now, rate_horizon);
            !window.is_empty()
        });
        self.failures.retain(|_, window| {
            window.prune(now, failure_horizon);
            !window.is_empty()
        });
        let idle_windows =
            windows_before.saturating_sub(self.rate_windows.len() + self.failures.len());

        let histories_before = self.access_history.len();
        let oldest = cutoff(now, history_horizon);
        self.access_history.retain(|_, history| {
            while history.front().is_some_and(|e| e.timestamp < oldest) {
                history.pop_front();
            }
            !history.is_empty()
        });
        let idle_histories = histories_before.saturating_sub(self.access_history.len());

        SweepReport {
            expired_blocks,
            idle_windows,
            idle_histories,
        }
    }

    pub fn tracked_windows(&self) -> usize {
        self.rate_windows.len()
    }

    pub fn tracked_principals(&self) -> usize {
        self.access_history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sweep_drops_idle_keys() {
        let t0 = Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap();
        let store = SecurityStore::new();
        store
            .rate_windows
            .entry(RateKey::new("u1", "api"))
            .or_default()
            .record(t0);
        store.failures.entry("u1".into()).or_default().record(t0);

        let later = t0 + TimeDelta::hours(2);
        let report = store.sweep(later, TimeDelta::hours(1), TimeDelta::hours(1), TimeDelta::hours(24));
        assert_eq!(report.idle_windows, 2);
        assert_eq!(store.tracked_windows(), 0);
    }
}
