//! Block table: identifiers currently refused by the engine.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::observability::metrics;
use crate::security::types::{DenialKind, ThreatLevel};
use crate::security::window::deadline;

/// A temporary refusal of every request from one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityBlock {
    pub identifier: String,
    /// Denial reported while the block is active.
    pub block_type: DenialKind,
    pub reason: String,
    pub threat_level: ThreatLevel,
    pub blocked_at: DateTime<Utc>,
    /// Always strictly after `blocked_at`.
    pub expires_at: DateTime<Utc>,
    /// Number of violations folded into this block.
    pub block_count: u32,
}

impl SecurityBlock {
    /// A block is honored only while `now < expires_at`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> TimeDelta {
        (self.expires_at - now).max(TimeDelta::zero())
    }
}

/// Parameters for a new or refreshed block.
#[derive(Debug, Clone)]
pub struct BlockRequest {
    pub block_type: DenialKind,
    pub reason: String,
    pub threat_level: ThreatLevel,
    pub duration: TimeDelta,
}

/// Concurrent identifier → block map.
#[derive(Debug, Default)]
pub struct BlockTable {
    inner: DashMap<String, SecurityBlock>,
}

impl BlockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active block for `identifier`, discarding it if it has expired.
    pub fn active(&self, identifier: &str, now: DateTime<Utc>) -> Option<SecurityBlock> {
        let block = self.inner.get(identifier).map(|r| r.value().clone())?;
        if block.is_active(now) {
            return Some(block);
        }
        // Only remove the entry we looked at; a concurrent refresh wins.
        self.inner
            .remove_if(identifier, |_, current| !current.is_active(now));
        None
    }

    /// Create a block, or refresh an active one and bump its count.
    pub fn impose(&self, identifier: &str, request: BlockRequest, now: DateTime<Utc>) -> SecurityBlock {
        // A zero or negative duration would violate expires_at > blocked_at.
        let duration = request.duration.max(TimeDelta::seconds(1));
        let expires_at = deadline(now, duration);

        let block = match self.inner.entry(identifier.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_active(now) => {
                let current = occupied.get_mut();
                current.block_count = current.block_count.saturating_add(1);
                current.expires_at = current.expires_at.max(expires_at);
                if request.threat_level >= current.threat_level {
                    current.block_type = request.block_type;
                    current.reason = request.reason;
                    current.threat_level = request.threat_level;
                }
                current.clone()
            }
            entry => {
                let block = SecurityBlock {
                    identifier: identifier.to_string(),
                    block_type: request.block_type,
                    reason: request.reason,
                    threat_level: request.threat_level,
                    blocked_at: now,
                    expires_at,
                    block_count: 1,
                };
                entry.insert(block.clone());
                block
            }
        };

        tracing::warn!(
            identifier = %block.identifier,
            kind = %block.block_type,
            threat_level = %block.threat_level,
            expires_at = %block.expires_at,
            block_count = block.block_count,
            "Security block imposed"
        );
        metrics::record_block(&block.block_type, block.threat_level);
        block
    }

    /// Remove a block regardless of expiry (manual clearance).
    pub fn lift(&self, identifier: &str) -> Option<SecurityBlock> {
        self.inner.remove(identifier).map(|(_, block)| block)
    }

    /// Drop every expired block. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, block| block.is_active(now));
        let removed = before.saturating_sub(self.inner.len());
        metrics::record_active_blocks(self.inner.len());
        removed
    }

    /// Active blocks, soonest expiry first.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<SecurityBlock> {
        let mut blocks: Vec<SecurityBlock> = self
            .inner
            .iter()
            .filter(|r| r.value().is_active(now))
            .map(|r| r.value().clone())
            .collect();
        blocks.sort_by_key(|b| b.expires_at);
        blocks
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Load active blocks from a JSON snapshot, if the file exists.
    pub fn load_from_file(path: &Path, now: DateTime<Utc>) -> std::io::Result<Self> {
        let table = Self::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            let blocks: Vec<SecurityBlock> = serde_json::from_reader(reader)?;
            for block in blocks.into_iter().filter(|b| b.is_active(now)) {
                table.inner.insert(block.identifier.clone(), block);
            }
            tracing::info!(path = %path.display(), blocks = table.len(), "Loaded security blocks");
        }
        Ok(table)
    }

    /// Write the active blocks to a JSON snapshot.
    pub fn save_to_file(&self, path: &Path, now: DateTime<Utc>) -> std::io::Result<()> {
        let blocks = self.snapshot(now);
        let tmp = path.with_extension("tmp");
        {
            let writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(writer, &blocks)?;
        }
        std::fs::rename(&tmp, path)?;
        tracing::debug!(path = %path.display(), blocks = blocks.len(), "Saved security blocks");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::types::RateWindow;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap()
    }

    fn burst_block(minutes: i64) -> BlockRequest {
        BlockRequest {
            block_type: DenialKind::RateLimitExceeded(RateWindow::Burst),
            reason: "burst".into(),
            threat_level: ThreatLevel::Medium,
            duration: TimeDelta::minutes(minutes),
        }
    }

    #[test]
    fn test_block_expires() {
        let table = BlockTable::new();
        let block = table.impose("u1", burst_block(5), t0());
        assert!(block.expires_at > block.blocked_at);
        assert!(table.active("u1", t0() + TimeDelta::minutes(4)).is_some());

        // Eligible again once the block has elapsed, and the entry is discarded.
        assert!(table.active("u1", t0() + TimeDelta::minutes(5)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_refresh_increments_count() {
        let table = BlockTable::new();
        table.impose("u1", burst_block(5), t0());
        let refreshed = table.impose("u1", burst_block(5), t0() + TimeDelta::minutes(1));
        assert_eq!(refreshed.block_count, 2);
        assert_eq!(refreshed.blocked_at, t0());
        assert_eq!(refreshed.expires_at, t0() + TimeDelta::minutes(6));

        // After expiry a new violation starts a fresh block.
        let fresh = table.impose("u1", burst_block(5), t0() + TimeDelta::hours(1));
        assert_eq!(fresh.block_count, 1);
    }

    #[test]
    fn test_zero_duration_still_expires_after_start() {
        let table = BlockTable::new();
        let block = table.impose("u1", burst_block(0), t0());
        assert!(block.expires_at > block.blocked_at);
    }

    #[test]
    fn test_oversized_duration_saturates() {
        let table = BlockTable::new();
        let mut request = burst_block(0);
        request.duration = TimeDelta::try_seconds(10_000_000_000_000).unwrap();
        let block = table.impose("u1", request, t0());
        assert_eq!(block.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(table.active("u1", t0() + TimeDelta::days(365)).is_some());
    }

    #[test]
    fn test_purge_and_lift() {
        let table = BlockTable::new();
        table.impose("a", burst_block(1), t0());
        table.impose("b", burst_block(10), t0());
        assert_eq!(table.purge_expired(t0() + TimeDelta::minutes(2)), 1);
        assert!(table.lift("b").is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.json");

        let table = BlockTable::new();
        table.impose("u1", burst_block(30), t0());
        table.impose("u2", burst_block(1), t0());
        table.save_to_file(&path, t0()).unwrap();

        let loaded = BlockTable::load_from_file(&path, t0() + TimeDelta::minutes(5)).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.active("u1", t0() + TimeDelta::minutes(5)).is_some());
    }
}
