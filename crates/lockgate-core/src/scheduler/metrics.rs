//! Scheduler fairness metrics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::locking::{LockRequest, Priority};

/// Counters and wait times kept by the fair scheduler.
///
/// Wait times are in milliseconds. Per-priority averages are two-sample
/// moving averages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerMetrics {
    pub total_requests: u64,
    pub processed_requests: u64,
    pub queued_requests: u64,

    pub requests_by_priority: HashMap<Priority, u64>,
    pub requests_by_user: HashMap<String, u64>,
    pub requests_by_project: HashMap<String, u64>,

    pub average_wait_ms: HashMap<Priority, f64>,
    pub max_wait_ms: f64,
    pub min_wait_ms: f64,

    pub starvation_events: u64,
    pub starvation_boosts: u64,

    pub last_updated: DateTime<Utc>,
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            processed_requests: 0,
            queued_requests: 0,
            requests_by_priority: HashMap::new(),
            requests_by_user: HashMap::new(),
            requests_by_project: HashMap::new(),
            average_wait_ms: HashMap::new(),
            max_wait_ms: 0.0,
            min_wait_ms: 0.0,
            starvation_events: 0,
            starvation_boosts: 0,
            last_updated: Utc::now(),
        }
    }
}

impl SchedulerMetrics {
    pub(crate) fn record_enqueued(&mut self) {
        self.total_requests += 1;
        self.queued_requests += 1;
    }

    pub(crate) fn record_cancelled(&mut self) {
        self.queued_requests = self.queued_requests.saturating_sub(1);
    }

    pub(crate) fn record_processed(&mut self, request: &LockRequest, wait: Option<Duration>) {
        self.processed_requests += 1;
        self.queued_requests = self.queued_requests.saturating_sub(1);
        *self.requests_by_priority.entry(request.priority).or_insert(0) += 1;
        *self.requests_by_user.entry(request.user.clone()).or_insert(0) += 1;
        *self
            .requests_by_project
            .entry(request.project().to_string())
            .or_insert(0) += 1;
        self.last_updated = Utc::now();

        let Some(wait) = wait else {
            return;
        };
        let wait_ms = wait.as_secs_f64() * 1000.0;

        let average = self.average_wait_ms.entry(request.priority).or_insert(0.0);
        *average = if *average == 0.0 {
            wait_ms
        } else {
            (*average + wait_ms) / 2.0
        };

        if self.max_wait_ms == 0.0 || wait_ms > self.max_wait_ms {
            self.max_wait_ms = wait_ms;
        }
        if self.min_wait_ms == 0.0 || wait_ms < self.min_wait_ms {
            self.min_wait_ms = wait_ms;
        }
    }

    pub(crate) fn record_starvation(&mut self, boosted: bool) {
        self.starvation_events += 1;
        if boosted {
            self.starvation_boosts += 1;
        }
    }

    /// Share of processed requests served to `user`, 0.0 before any
    pub fn user_share(&self, user: &str) -> f64 {
        if self.processed_requests == 0 {
            return 0.0;
        }
        self.requests_by_user.get(user).copied().unwrap_or(0) as f64 / self.processed_requests as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::locking::ResourceIdentifier;

    fn request(user: &str, priority: Priority) -> LockRequest {
        LockRequest::new(ResourceIdentifier::new("acme", "db", "prod"), user, priority)
    }

    #[test]
    fn test_processed_counters_and_wait_times() {
        let mut metrics = SchedulerMetrics::default();
        metrics.record_enqueued();
        metrics.record_enqueued();

        metrics.record_processed(&request("alice", Priority::High), Some(Duration::from_millis(40)));
        metrics.record_processed(&request("bob", Priority::High), Some(Duration::from_millis(20)));

        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.queued_requests, 0);
        assert_eq!(metrics.requests_by_priority[&Priority::High], 2);
        assert_eq!(metrics.requests_by_project["acme"], 2);
        assert_eq!(metrics.average_wait_ms[&Priority::High], 30.0);
        assert_eq!(metrics.max_wait_ms, 40.0);
        assert_eq!(metrics.min_wait_ms, 20.0);
        assert_eq!(metrics.user_share("alice"), 0.5);
    }

    #[test]
    fn test_starvation_counters() {
        let mut metrics = SchedulerMetrics::default();
        metrics.record_starvation(true);
        metrics.record_starvation(false);
        assert_eq!(metrics.starvation_events, 2);
        assert_eq!(metrics.starvation_boosts, 1);
    }
}
