//! Periodic sweep of expired blocks and idle tracking state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::security::SecurityCoordinator;

#[derive(Clone)]
pub struct Sweeper {
    coordinator: Arc<SecurityCoordinator>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    blocks_path: Option<PathBuf>,
}

impl Sweeper {
    pub fn new(
        coordinator: Arc<SecurityCoordinator>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        blocks_path: Option<PathBuf>,
    ) -> Self {
        Self {
            coordinator,
            clock,
            interval,
            blocks_path,
        }
    }

    /// One sweep plus snapshot.
    pub fn run_once(&self) {
        let now = self.clock.now();
        let report = self.coordinator.sweep(now);
        tracing::debug!(
            expired_blocks = report.expired_blocks,
            idle_windows = report.idle_windows,
            idle_histories = report.idle_histories,
            "State sweep complete"
        );
        self.save_blocks();
    }

    fn save_blocks(&self) {
        let Some(path) = &self.blocks_path else {
            return;
        };
        if let Err(e) = self.coordinator.store().blocks.save_to_file(path, self.clock.now()) {
            tracing::error!(path = %path.display(), error = %e, "Failed to save block snapshot");
        }
    }

    /// Sweep on every tick until shutdown, then save a final snapshot.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sweeper = self.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || sweeper.run_once()).await {
                            tracing::error!(error = %e, "State sweep task failed");
                        }
                    }
                    _ = shutdown.recv() => {
                        self.save_blocks();
                        tracing::info!("Sweeper stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::clock::ManualClock;
    use crate::config::GuardConfig;
    use crate::security::blocks::BlockRequest;
    use crate::security::{BlockTable, DenialKind, SecurityStore, ThreatLevel};
    use chrono::{TimeDelta, TimeZone, Utc};

    #[test]
    fn test_run_once_purges_and_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.json");
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()));
        let store = Arc::new(SecurityStore::new());
        let audit = Arc::new(AuditLog::in_memory(clock.clone()));
        let coordinator = Arc::new(
            SecurityCoordinator::from_config(&GuardConfig::default(), Arc::clone(&store), audit, clock.clone())
                .unwrap(),
        );

        for (id, minutes) in [("short", 5), ("long", 120)] {
            store.blocks.impose(
                id,
                BlockRequest {
                    block_type: DenialKind::BruteForceDetected,
                    reason: "test".into(),
                    threat_level: ThreatLevel::Critical,
                    duration: TimeDelta::minutes(minutes),
                },
                clock.now(),
            );
        }

        clock.advance(TimeDelta::minutes(10));
        let sweeper = Sweeper::new(coordinator, clock.clone(), Duration::from_secs(60), Some(path.clone()));
        sweeper.run_once();

        assert_eq!(store.blocks.len(), 1);
        let reloaded = BlockTable::load_from_file(&path, clock.now()).unwrap();
        assert!(reloaded.active("long", clock.now()).is_some());
        assert!(reloaded.active("short", clock.now()).is_none());
    }
}
