//! Resolver statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::policy::ResolutionPolicy;
use crate::domain::locking::Priority;

/// Counters kept by the advanced resolver.
///
/// [`DeadlockResolver::get_resolution_stats`](super::DeadlockResolver::get_resolution_stats)
/// hands out clones, never the live value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionStats {
    pub total_resolutions: u64,
    pub successful_resolutions: u64,
    pub failed_resolutions: u64,

    /// Two-sample moving average of resolution duration, in milliseconds
    pub average_resolution_ms: f64,

    /// Attempts per policy, fallbacks included
    pub policy_usage: HashMap<ResolutionPolicy, u64>,

    /// Successful attempts per policy
    pub policy_successes: HashMap<ResolutionPolicy, u64>,

    /// Victims by the priority of the lock they held
    pub victims_by_priority: HashMap<Priority, u64>,

    /// Cascade re-checks that ran to completion
    pub cascade_resolutions: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_resolution: Option<DateTime<Utc>>,
}

impl ResolutionStats {
    /// Record the outcome of one top-level resolution
    pub(crate) fn record_outcome(&mut self, success: bool, elapsed: Duration) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        self.total_resolutions += 1;
        if success {
            self.successful_resolutions += 1;
        } else {
            self.failed_resolutions += 1;
        }

        self.average_resolution_ms = if self.total_resolutions == 1 {
            elapsed_ms
        } else {
            (self.average_resolution_ms + elapsed_ms) / 2.0
        };
        self.last_resolution = Some(Utc::now());
    }

    pub(crate) fn record_attempt(&mut self, policy: ResolutionPolicy) {
        *self.policy_usage.entry(policy).or_insert(0) += 1;
    }

    pub(crate) fn record_success(&mut self, policy: ResolutionPolicy, victim_priority: Priority) {
        *self.policy_successes.entry(policy).or_insert(0) += 1;
        *self.victims_by_priority.entry(victim_priority).or_insert(0) += 1;
    }

    /// (attempts, successes) for `policy`
    pub fn policy_record(&self, policy: ResolutionPolicy) -> (u64, u64) {
        (
            self.policy_usage.get(&policy).copied().unwrap_or(0),
            self.policy_successes.get(&policy).copied().unwrap_or(0),
        )
    }

    /// Fraction of resolutions that succeeded, or 0.0 with none recorded
    pub fn success_rate(&self) -> f64 {
        if self.total_resolutions == 0 {
            return 0.0;
        }
        self.successful_resolutions as f64 / self.total_resolutions as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moving_average_uses_two_samples() {
        let mut stats = ResolutionStats::default();
        stats.record_outcome(true, Duration::from_millis(10));
        assert_eq!(stats.average_resolution_ms, 10.0);
        stats.record_outcome(false, Duration::from_millis(30));
        assert_eq!(stats.average_resolution_ms, 20.0);
        stats.record_outcome(true, Duration::from_millis(40));
        assert_eq!(stats.average_resolution_ms, 30.0);

        assert_eq!(stats.total_resolutions, 3);
        assert_eq!(stats.failed_resolutions, 1);
        assert!(stats.last_resolution.is_some());
        assert!((stats.success_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_policy_record() {
        let mut stats = ResolutionStats::default();
        stats.record_attempt(ResolutionPolicy::Fifo);
        stats.record_attempt(ResolutionPolicy::Fifo);
        stats.record_success(ResolutionPolicy::Fifo, Priority::Low);

        assert_eq!(stats.policy_record(ResolutionPolicy::Fifo), (2, 1));
        assert_eq!(stats.policy_record(ResolutionPolicy::Lifo), (0, 0));
        assert_eq!(stats.victims_by_priority[&Priority::Low], 1);
    }

    #[test]
    fn test_serializes_enum_keys() {
        let mut stats = ResolutionStats::default();
        stats.record_attempt(ResolutionPolicy::YoungestFirst);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["policy_usage"]["youngest"], 1);
    }
}
