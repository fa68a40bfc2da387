//! Sliding-window event log.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::VecDeque;

/// Ascending timestamps of observed events for one key.
#[derive(Debug, Clone, Default)]
pub struct SlidingWindow {
    events: VecDeque<DateTime<Utc>>,
}

impl SlidingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event. A clock that steps backwards records the previous
    /// maximum instead, keeping the window ordered.
    pub fn record(&mut self, now: DateTime<Utc>) {
        let at = match self.events.back() {
            Some(last) if *last > now => *last,
            _ => now,
        };
        self.events.push_back(at);
    }

    /// Drop events older than `now - horizon`.
    pub fn prune(&mut self, now: DateTime<Utc>, horizon: TimeDelta) {
        let oldest = cutoff(now, horizon);
        while self.events.front().is_some_and(|t| *t < oldest) {
            self.events.pop_front();
        }
    }

    /// Events within the last `span`, inclusive of the boundary.
    pub fn count_within(&self, now: DateTime<Utc>, span: TimeDelta) -> usize {
        let since = cutoff(now, span);
        self.events.iter().rev().take_while(|t| **t >= since).count()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.events.back().copied()
    }
}

/// `now - span`, saturating at the earliest representable instant.
pub(crate) fn cutoff(now: DateTime<Utc>, span: TimeDelta) -> DateTime<Utc> {
    now.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `now + span`, saturating at the latest representable instant.
pub(crate) fn deadline(now: DateTime<Utc>, span: TimeDelta) -> DateTime<Utc> {
    now.checked_add_signed(span).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_count_and_prune() {
        let mut window = SlidingWindow::new();
        for secs in [0, 20, 50, 70] {
            window.record(t0() + TimeDelta::seconds(secs));
        }
        let now = t0() + TimeDelta::seconds(70);
        assert_eq!(window.count_within(now, TimeDelta::seconds(10)), 1);
        assert_eq!(window.count_within(now, TimeDelta::seconds(60)), 3);

        window.prune(now, TimeDelta::seconds(30));
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_record_is_monotonic() {
        let mut window = SlidingWindow::new();
        window.record(t0());
        window.record(t0() - TimeDelta::seconds(30));
        assert_eq!(window.newest(), Some(t0()));
        assert_eq!(window.count_within(t0(), TimeDelta::seconds(1)), 2);
    }

    #[test]
    fn test_huge_spans_saturate() {
        let huge = TimeDelta::try_seconds(10_000_000_000_000).unwrap();
        assert_eq!(cutoff(t0(), huge), DateTime::<Utc>::MIN_UTC);
        assert_eq!(deadline(t0(), huge), DateTime::<Utc>::MAX_UTC);

        let mut window = SlidingWindow::new();
        window.record(t0());
        window.prune(t0(), huge);
        assert_eq!(window.count_within(t0(), huge), 1);
    }
}
