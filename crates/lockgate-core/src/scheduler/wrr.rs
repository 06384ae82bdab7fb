//! Weighted round robin
//!
//! One pooled queue. The winner is the request with the largest combined
//! deficit `(user_weight - user_counter) + (project_weight - project_counter)`.
//! Ties go to the larger request weight, then to the earlier arrival.

use std::collections::HashMap;

use super::types::QueuedRequest;

/// Deficit-based weighted round robin queue
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    requests: Vec<QueuedRequest>,
    user_counters: HashMap<String, u64>,
    project_counters: HashMap<String, u64>,
    user_weights: HashMap<String, f64>,
    project_weights: HashMap<String, f64>,
}

impl WeightedRoundRobin {
    pub fn new(user_weights: HashMap<String, f64>, project_weights: HashMap<String, f64>) -> Self {
        Self {
            user_weights,
            project_weights,
            ..Default::default()
        }
    }

    pub fn push(&mut self, request: QueuedRequest) {
        self.requests.push(request);
    }

    fn deficit(&self, request: &QueuedRequest) -> f64 {
        let user_weight = self.user_weights.get(request.user()).copied().unwrap_or(1.0);
        let user_counter = self.user_counters.get(request.user()).copied().unwrap_or(0);
        let project_weight = self
            .project_weights
            .get(request.project())
            .copied()
            .unwrap_or(1.0);
        let project_counter = self
            .project_counters
            .get(request.project())
            .copied()
            .unwrap_or(0);

        (user_weight - user_counter as f64) + (project_weight - project_counter as f64)
    }

    pub fn pop_next(&mut self) -> Option<QueuedRequest> {
        let mut best: Option<(usize, f64, f64)> = None;

        for (i, request) in self.requests.iter().enumerate() {
            let deficit = self.deficit(request);
            let better = match best {
                None => true,
                Some((_, best_deficit, best_weight)) => {
                    deficit > best_deficit || (deficit == best_deficit && request.weight > best_weight)
                }
            };
            if better {
                best = Some((i, deficit, request.weight));
            }
        }

        let (index, _, _) = best?;
        let selected = self.requests.remove(index);

        *self
            .user_counters
            .entry(selected.user().to_string())
            .or_insert(0) += 1;
        *self
            .project_counters
            .entry(selected.project().to_string())
            .or_insert(0) += 1;

        self.requests.iter_mut().for_each(|r| r.attempts += 1);
        Some(selected)
    }

    /// Multiply the request's weight. Returns the new weight.
    pub fn boost(&mut self, request_id: &str, factor: f64) -> Option<f64> {
        let request = self.requests.iter_mut().find(|r| r.id() == request_id)?;
        request.weight *= factor;
        request.starvation_boost = factor;
        Some(request.weight)
    }

    pub fn remove(&mut self, request_id: &str) -> Option<QueuedRequest> {
        let index = self.requests.iter().position(|r| r.id() == request_id)?;
        Some(self.requests.remove(index))
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn requests(&self) -> Vec<QueuedRequest> {
        self.requests.clone()
    }

    /// Times `user` has been selected
    pub fn user_counter(&self, user: &str) -> u64 {
        self.user_counters.get(user).copied().unwrap_or(0)
    }

    /// Times a request from `project` has been selected
    pub fn project_counter(&self, project: &str) -> u64 {
        self.project_counters.get(project).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::locking::{LockRequest, Priority, ResourceIdentifier};
    use tokio::time::Instant;

    fn queued(id: &str, user: &str, project: &str) -> QueuedRequest {
        let request = LockRequest::with_id(
            id,
            ResourceIdentifier::new(project, "r", "ws"),
            user,
            Priority::Normal,
        );
        QueuedRequest::new(request, 2.0, Instant::now())
    }

    #[tokio::test]
    async fn test_weights_shape_service_share() {
        let users = HashMap::from([("heavy".to_string(), 3.0)]);
        let mut wrr = WeightedRoundRobin::new(users, HashMap::new());

        for i in 0..4 {
            wrr.push(queued(&format!("h{}", i), "heavy", "p1"));
            wrr.push(queued(&format!("l{}", i), "light", "p2"));
        }

        let first_four: Vec<String> = (0..4)
            .map(|_| wrr.pop_next().unwrap().user().to_string())
            .collect();
        let heavy = first_four.iter().filter(|u| *u == "heavy").count();
        assert!(heavy >= 2, "heavy user served {} of 4", heavy);
        assert_eq!(wrr.user_counter("heavy") + wrr.user_counter("light"), 4);
    }

    #[tokio::test]
    async fn test_non_empty_queue_always_yields() {
        let mut wrr = WeightedRoundRobin::new(HashMap::new(), HashMap::new());
        wrr.push(queued("a", "alice", "p"));
        wrr.pop_next();

        // alice's deficit is now negative but her next request must still come out
        wrr.push(queued("b", "alice", "p"));
        assert_eq!(wrr.pop_next().unwrap().id(), "b");
        assert_eq!(wrr.project_counter("p"), 2);
        assert!(wrr.pop_next().is_none());
    }

    #[tokio::test]
    async fn test_boosted_weight_breaks_ties() {
        let mut wrr = WeightedRoundRobin::new(HashMap::new(), HashMap::new());
        wrr.push(queued("first", "alice", "p1"));
        wrr.push(queued("second", "bob", "p2"));

        assert_eq!(wrr.boost("second", 1.5), Some(3.0));
        assert_eq!(wrr.pop_next().unwrap().id(), "second");
        assert_eq!(wrr.requests()[0].attempts, 1);
    }
}
