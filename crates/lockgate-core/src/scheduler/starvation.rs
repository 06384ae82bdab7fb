//! Starvation tracking

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Tracks how long each queued request has waited and when it was boosted
#[derive(Debug)]
pub struct StarvationTracker {
    threshold: Duration,
    request_age: HashMap<String, Instant>,
    boost_history: HashMap<String, Vec<Instant>>,
}

impl StarvationTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            request_age: HashMap::new(),
            boost_history: HashMap::new(),
        }
    }

    pub fn track(&mut self, request_id: impl Into<String>, queued_at: Instant) {
        self.request_age.insert(request_id.into(), queued_at);
    }

    /// Stop tracking; returns when the request was queued
    pub fn untrack(&mut self, request_id: &str) -> Option<Instant> {
        self.boost_history.remove(request_id);
        self.request_age.remove(request_id)
    }

    /// Requests waiting longer than the threshold at `now`, sorted by ID
    pub fn starving(&self, now: Instant) -> Vec<String> {
        let mut ids: Vec<String> = self
            .request_age
            .iter()
            .filter(|(_, queued_at)| now.saturating_duration_since(**queued_at) > self.threshold)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn record_boost(&mut self, request_id: &str, at: Instant) {
        self.boost_history
            .entry(request_id.to_string())
            .or_default()
            .push(at);
    }

    /// Number of boosts applied to a request still being tracked
    pub fn boost_count(&self, request_id: &str) -> usize {
        self.boost_history.get(request_id).map_or(0, Vec::len)
    }

    pub fn queued_at(&self, request_id: &str) -> Option<Instant> {
        self.request_age.get(request_id).copied()
    }

    pub fn len(&self) -> usize {
        self.request_age.len()
    }

    pub fn is_empty(&self) -> bool {
        self.request_age.is_empty()
    }
}
