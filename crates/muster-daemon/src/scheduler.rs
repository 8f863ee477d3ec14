//! Adaptive polling schedule.
//!
//! The main loop re-arms a single-shot delay after every cycle, so an
//! interval change always takes effect on the very next cycle. Interval
//! selection is a pure function of the last observed activity, which keeps
//! it testable without wall-clock waits; the slow process-scan and
//! enumeration passes run on fixed tickers owned by the event loop.

use std::time::{Duration, Instant};

use muster_core::config::PollingConfig;

/// Activity-driven interval selection for the main poll loop.
#[derive(Debug)]
pub struct ActivityState {
    active_interval: Duration,
    idle_interval: Duration,
    idle_threshold: Duration,
    last_activity: Instant,
}

impl ActivityState {
    pub fn new(config: &PollingConfig) -> Self {
        Self {
            active_interval: Duration::from_secs(config.active_interval_secs),
            idle_interval: Duration::from_secs(config.idle_interval_secs),
            idle_threshold: Duration::from_secs(config.idle_threshold_secs),
            last_activity: Instant::now(),
        }
    }

    /// Record user-visible activity. Returns `true` when this flipped the
    /// schedule from idle to active, in which case the caller reschedules
    /// the next poll immediately.
    pub fn mark_activity(&mut self, now: Instant) -> bool {
        let was_idle = self.is_idle(now);
        self.last_activity = now;
        was_idle
    }

    fn is_idle(&self, now: Instant) -> bool {
        now.duration_since(self.last_activity) > self.idle_threshold
    }

    /// Interval to arm for the next cycle.
    pub fn dynamic_interval(&self, now: Instant) -> Duration {
        if self.is_idle(now) {
            self.idle_interval
        } else {
            self.active_interval
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ActivityState {
        ActivityState::new(&PollingConfig::default())
    }

    #[test]
    fn recent_activity_selects_active_interval() {
        let mut s = state();
        let now = Instant::now();
        s.mark_activity(now);
        assert_eq!(s.dynamic_interval(now), Duration::from_secs(10));
    }

    #[test]
    fn stale_activity_selects_idle_interval() {
        let mut s = state();
        let start = Instant::now();
        s.mark_activity(start);
        let later = start + Duration::from_secs(301);
        assert_eq!(s.dynamic_interval(later), Duration::from_secs(60));
    }

    #[test]
    fn threshold_boundary_is_exclusive() {
        let mut s = state();
        let start = Instant::now();
        s.mark_activity(start);
        let at_threshold = start + Duration::from_secs(300);
        assert_eq!(s.dynamic_interval(at_threshold), Duration::from_secs(10));
    }

    #[test]
    fn mark_activity_reports_idle_to_active_flip() {
        let mut s = state();
        let start = Instant::now();
        s.mark_activity(start);

        // Still active: no flip.
        assert!(!s.mark_activity(start + Duration::from_secs(5)));

        // Long idle gap: flip reported exactly once.
        let after_idle = start + Duration::from_secs(1000);
        assert!(s.mark_activity(after_idle));
        assert!(!s.mark_activity(after_idle + Duration::from_secs(1)));
    }
}
