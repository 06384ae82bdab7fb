//! Deadlock detection metrics
//!
//! Counters are atomics behind a shared handle, so a detector and whoever
//! reports on it can hold the same metrics object. The resolution history
//! is a bounded ring; the oldest entry is evicted first.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::types::Deadlock;

/// Detector metrics handle
#[derive(Debug, Clone)]
pub struct DeadlockMetrics {
    inner: Arc<DeadlockMetricsInner>,
}

#[derive(Debug)]
struct DeadlockMetricsInner {
    deadlocks_detected: AtomicU64,
    deadlocks_resolved: AtomicU64,
    prevented_deadlocks: AtomicU64,
    waiting_requests: AtomicU64,
    max_history_size: usize,
    resolution_history: RwLock<VecDeque<Deadlock>>,
}

/// Point-in-time copy of the detector metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeadlockMetricsSnapshot {
    pub deadlocks_detected: u64,
    pub deadlocks_resolved: u64,
    pub prevented_deadlocks: u64,
    pub waiting_requests: u64,
    pub max_history_size: usize,
    pub resolution_history: Vec<Deadlock>,
}

impl DeadlockMetrics {
    /// Creates metrics keeping at most `history_size` resolved deadlocks
    pub fn new(history_size: usize) -> Self {
        Self {
            inner: Arc::new(DeadlockMetricsInner {
                deadlocks_detected: AtomicU64::new(0),
                deadlocks_resolved: AtomicU64::new(0),
                prevented_deadlocks: AtomicU64::new(0),
                waiting_requests: AtomicU64::new(0),
                max_history_size: history_size,
                resolution_history: RwLock::new(VecDeque::new()),
            }),
        }
    }

    pub fn inc_detected(&self, count: u64) {
        self.inner
            .deadlocks_detected
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_resolved(&self) {
        self.inner.deadlocks_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_prevented(&self) {
        self.inner.prevented_deadlocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_waiting(&self) {
        self.inner.waiting_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the waiting gauge, saturating at zero
    pub fn dec_waiting(&self) {
        let _ = self.inner.waiting_requests.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |n| Some(n.saturating_sub(1)),
        );
    }

    /// Appends a resolved deadlock to the history ring
    pub async fn record_resolution(&self, deadlock: &Deadlock) {
        if self.inner.max_history_size == 0 {
            return;
        }

        let mut history = self.inner.resolution_history.write().await;
        history.push_back(deadlock.clone());
        while history.len() > self.inner.max_history_size {
            history.pop_front();
        }
    }

    pub fn deadlocks_detected(&self) -> u64 {
        self.inner.deadlocks_detected.load(Ordering::Relaxed)
    }
    pub fn deadlocks_resolved(&self) -> u64 {
        self.inner.deadlocks_resolved.load(Ordering::Relaxed)
    }
    pub fn prevented_deadlocks(&self) -> u64 {
        self.inner.prevented_deadlocks.load(Ordering::Relaxed)
    }
    pub fn waiting_requests(&self) -> u64 {
        self.inner.waiting_requests.load(Ordering::Relaxed)
    }

    /// Independent copy of all counters and the history
    pub async fn snapshot(&self) -> DeadlockMetricsSnapshot {
        let history = self.inner.resolution_history.read().await;
        DeadlockMetricsSnapshot {
            deadlocks_detected: self.deadlocks_detected(),
            deadlocks_resolved: self.deadlocks_resolved(),
            prevented_deadlocks: self.prevented_deadlocks(),
            waiting_requests: self.waiting_requests(),
            max_history_size: self.inner.max_history_size,
            resolution_history: history.iter().cloned().collect(),
        }
    }
}
