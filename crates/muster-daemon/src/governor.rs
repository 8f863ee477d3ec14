//! Rate-limit governor for the review API.
//!
//! Maps the review API's remaining quota (the more restrictive of its two
//! sub-APIs) to one of four polling tiers. Instances refresh their review
//! status only when the governor allows it; a skipped refresh carries the
//! previous status and fetch timestamp forward so cadence stays accurate
//! and "no PR" never flaps.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use muster_core::config::ReviewConfig;
use tracing::{debug, warn};

use crate::probes::Probes;

/// Polling tier derived from remaining quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateTier {
    /// Quota nearly exhausted: review polling pauses entirely.
    Critical,
    Low,
    Caution,
    Normal,
}

impl RateTier {
    /// Per-instance review poll interval for this tier; `None` while paused.
    pub fn poll_interval(self) -> Option<Duration> {
        match self {
            Self::Critical => None,
            Self::Low => Some(Duration::from_secs(300)),
            Self::Caution => Some(Duration::from_secs(120)),
            Self::Normal => Some(Duration::from_secs(30)),
        }
    }
}

/// Classify a remaining quota against configured thresholds.
pub fn classify(remaining: u64, config: &ReviewConfig) -> RateTier {
    if remaining <= config.critical_remaining {
        RateTier::Critical
    } else if remaining <= config.low_remaining {
        RateTier::Low
    } else if remaining <= config.caution_remaining {
        RateTier::Caution
    } else {
        RateTier::Normal
    }
}

/// Tracks quota and answers "may this instance refresh its review now?".
pub struct RateLimitGovernor {
    config: ReviewConfig,
    tier: RateTier,
    remaining: Option<u64>,
    last_check: Option<Instant>,
}

impl RateLimitGovernor {
    pub fn new(config: ReviewConfig) -> Self {
        Self {
            config,
            // Optimistic until the first quota check lands.
            tier: RateTier::Normal,
            remaining: None,
            last_check: None,
        }
    }

    pub fn tier(&self) -> RateTier {
        self.tier
    }

    pub fn paused(&self) -> bool {
        self.tier == RateTier::Critical
    }

    /// Query remaining quota, throttled to the configured check interval
    /// unless forced. A failed query keeps the previous tier; quota state
    /// must never make probe errors fatal.
    pub async fn maybe_refresh(&mut self, probes: &dyn Probes, force: bool) {
        if !self.config.enabled {
            return;
        }
        let throttle = Duration::from_secs(self.config.rate_check_interval_secs);
        if !force
            && let Some(last) = self.last_check
            && last.elapsed() < throttle
        {
            return;
        }

        match probes.rate_limit().await {
            Ok(limits) => {
                let remaining = limits.most_restrictive();
                let tier = classify(remaining, &self.config);
                if tier != self.tier {
                    debug!(
                        "Rate tier changed {:?} -> {:?} ({} remaining)",
                        self.tier, tier, remaining
                    );
                }
                self.tier = tier;
                self.remaining = Some(remaining);
                self.last_check = Some(Instant::now());
            }
            Err(e) => {
                warn!("Rate-limit query failed, keeping tier {:?}: {e}", self.tier);
                self.last_check = Some(Instant::now());
            }
        }
    }

    /// Gate for one instance's review refresh: not paused, and either
    /// forced, never fetched, or stale past the tier interval.
    pub fn should_refresh(
        &self,
        last_fetch: Option<DateTime<Utc>>,
        force: bool,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.config.enabled {
            return false;
        }
        let Some(interval) = self.tier.poll_interval() else {
            return false;
        };
        if force {
            return true;
        }
        match last_fetch {
            None => true,
            Some(at) => {
                let elapsed = (now - at).to_std().unwrap_or(Duration::ZERO);
                elapsed > interval
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn force_tier(&mut self, tier: RateTier) {
        self.tier = tier;
    }
}
