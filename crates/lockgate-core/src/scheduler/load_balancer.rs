//! Load bookkeeping per user, project and resource
//!
//! Counters cover a fixed window and are cleared when it elapses. They are
//! advisory: nothing in admission reads them yet.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::locking::LockRequest;

/// Admissions counted in the current window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSnapshot {
    pub user_load: HashMap<String, u64>,
    pub project_load: HashMap<String, u64>,
    pub resource_load: HashMap<String, u64>,
    pub window_elapsed_ms: u64,
}

#[derive(Debug)]
pub struct LoadBalancer {
    window: Duration,
    window_start: Instant,
    user_load: HashMap<String, u64>,
    project_load: HashMap<String, u64>,
    resource_load: HashMap<String, u64>,
}

impl LoadBalancer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: Instant::now(),
            user_load: HashMap::new(),
            project_load: HashMap::new(),
            resource_load: HashMap::new(),
        }
    }

    /// Start a new window if the current one has elapsed. Returns whether it reset.
    pub fn rebalance(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.window_start) <= self.window {
            return false;
        }

        self.user_load.clear();
        self.project_load.clear();
        self.resource_load.clear();
        self.window_start = now;
        true
    }

    /// Count an admission
    pub fn record(&mut self, request: &LockRequest) {
        *self.user_load.entry(request.user.clone()).or_insert(0) += 1;
        *self
            .project_load
            .entry(request.project().to_string())
            .or_insert(0) += 1;
        *self
            .resource_load
            .entry(request.resource.key())
            .or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> LoadSnapshot {
        LoadSnapshot {
            user_load: self.user_load.clone(),
            project_load: self.project_load.clone(),
            resource_load: self.resource_load.clone(),
            window_elapsed_ms: self.window_start.elapsed().as_millis() as u64,
        }
    }
}
