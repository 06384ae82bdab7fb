//! Priority-tiered queue
//!
//! Tiers are scanned from critical down. Within the first non-empty tier
//! the request whose user was served least recently wins; users never
//! served in that tier come first, in arrival order.

use std::collections::{BTreeMap, HashMap};
use tokio::time::Instant;

use super::types::QueuedRequest;
use crate::domain::locking::Priority;

#[derive(Debug, Default)]
struct Tier {
    requests: Vec<QueuedRequest>,
    last_served: HashMap<String, Instant>,
}

/// Four independent sub-queues, one per priority
#[derive(Debug)]
pub struct PriorityQueue {
    tiers: BTreeMap<Priority, Tier>,
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self {
            tiers: Priority::ALL.into_iter().map(|p| (p, Tier::default())).collect(),
        }
    }

    pub fn push(&mut self, request: QueuedRequest) {
        self.tiers
            .entry(request.tier())
            .or_default()
            .requests
            .push(request);
    }

    pub fn pop_next(&mut self) -> Option<QueuedRequest> {
        let now = Instant::now();

        let selected = self.tiers.values_mut().rev().find_map(|tier| {
            let index = tier
                .requests
                .iter()
                .enumerate()
                .min_by_key(|(_, r)| tier.last_served.get(r.user()).copied())
                .map(|(i, _)| i)?;

            let request = tier.requests.remove(index);
            tier.last_served.insert(request.user().to_string(), now);
            Some(request)
        });

        if selected.is_some() {
            for tier in self.tiers.values_mut() {
                tier.requests.iter_mut().for_each(|r| r.attempts += 1);
            }
        }

        selected
    }

    /// Multiply the request's effective priority, moving it up a tier
    /// when it crosses a boundary. Returns the new effective priority.
    pub fn boost(&mut self, request_id: &str, factor: f64) -> Option<f64> {
        let (tier, index) = self.tiers.iter().find_map(|(priority, tier)| {
            let index = tier.requests.iter().position(|r| r.id() == request_id)?;
            Some((*priority, index))
        })?;

        let requests = &mut self.tiers.get_mut(&tier)?.requests;
        let request = &mut requests[index];
        request.effective_priority *= factor;
        request.starvation_boost = factor;
        let effective = request.effective_priority;

        if request.tier() != tier {
            let promoted = requests.remove(index);
            self.push(promoted);
        }

        Some(effective)
    }

    pub fn remove(&mut self, request_id: &str) -> Option<QueuedRequest> {
        self.tiers.values_mut().find_map(|tier| {
            let index = tier.requests.iter().position(|r| r.id() == request_id)?;
            Some(tier.requests.remove(index))
        })
    }

    pub fn len(&self) -> usize {
        self.tiers.values().map(|t| t.requests.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued requests, highest tier first
    pub fn requests(&self) -> Vec<QueuedRequest> {
        self.tiers
            .values()
            .rev()
            .flat_map(|t| t.requests.iter().cloned())
            .collect()
    }
}
