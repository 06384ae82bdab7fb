//! Completely fair scheduling by virtual runtime
//!
//! Each user accumulates virtual runtime `time_slice / weight` per
//! admission; the queued request with the lowest virtual runtime goes
//! next. A user seen for the first time starts at the current minimum
//! across known users, so late joiners neither jump the queue nor wait
//! behind everyone's accumulated history.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::types::{QueuedRequest, VRuntimeRequest};

/// Weight of a user with no configured weight
pub const DEFAULT_CFS_WEIGHT: f64 = 1024.0;

/// Virtual-runtime scheduler
#[derive(Debug)]
pub struct CompletelyFairScheduler {
    requests: Vec<VRuntimeRequest>,
    vruntime: HashMap<String, f64>,
    user_weights: HashMap<String, f64>,
    time_slice: Duration,
}

impl CompletelyFairScheduler {
    /// `user_weights` scale [`DEFAULT_CFS_WEIGHT`]; unlisted users get 1.0
    pub fn new(user_weights: HashMap<String, f64>, time_slice: Duration) -> Self {
        Self {
            requests: Vec::new(),
            vruntime: HashMap::new(),
            user_weights,
            time_slice,
        }
    }

    fn weight(&self, user: &str) -> f64 {
        DEFAULT_CFS_WEIGHT * self.user_weights.get(user).copied().unwrap_or(1.0)
    }

    fn min_vruntime(&self) -> f64 {
        self.vruntime
            .values()
            .copied()
            .min_by(f64::total_cmp)
            .unwrap_or(0.0)
    }

    pub fn push(&mut self, request: QueuedRequest) {
        let seed = self.min_vruntime();
        let virtual_runtime = *self
            .vruntime
            .entry(request.user().to_string())
            .or_insert(seed);

        self.requests.push(VRuntimeRequest {
            queued: request,
            virtual_runtime,
            time_slice: self.time_slice,
            last_scheduled: None,
        });
    }

    pub fn pop_next(&mut self) -> Option<QueuedRequest> {
        let index = self
            .requests
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.virtual_runtime.total_cmp(&b.virtual_runtime))
            .map(|(i, _)| i)?;

        let mut selected = self.requests.remove(index);
        let user = selected.queued.user().to_string();

        let increment = self.time_slice.as_nanos() as f64 / self.weight(&user);
        let runtime = self.vruntime.entry(user.clone()).or_insert(0.0);
        *runtime += increment;
        selected.virtual_runtime = *runtime;
        selected.last_scheduled = Some(Instant::now());

        // The user's other queued requests age with the user
        for pending in &mut self.requests {
            pending.queued.attempts += 1;
            if pending.queued.user() == user {
                pending.virtual_runtime += increment;
            }
        }

        Some(selected.queued)
    }

    /// Divide the request's virtual runtime. Returns the new value.
    pub fn boost(&mut self, request_id: &str, factor: f64) -> Option<f64> {
        let request = self
            .requests
            .iter_mut()
            .find(|r| r.queued.id() == request_id)?;
        request.virtual_runtime /= factor;
        request.queued.starvation_boost = factor;
        Some(request.virtual_runtime)
    }

    pub fn remove(&mut self, request_id: &str) -> Option<QueuedRequest> {
        let index = self
            .requests
            .iter()
            .position(|r| r.queued.id() == request_id)?;
        Some(self.requests.remove(index).queued)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn requests(&self) -> Vec<QueuedRequest> {
        self.requests.iter().map(|r| r.queued.clone()).collect()
    }

    /// Queued entries with their virtual runtimes
    pub fn entries(&self) -> Vec<VRuntimeRequest> {
        self.requests.clone()
    }

    /// Accumulated virtual runtime of `user`
    pub fn user_vruntime(&self, user: &str) -> Option<f64> {
        self.vruntime.get(user).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::locking::{LockRequest, Priority, ResourceIdentifier};

    fn queued(id: &str, user: &str) -> QueuedRequest {
        let request = LockRequest::with_id(
            id,
            ResourceIdentifier::new("ns", "r", "ws"),
            user,
            Priority::Normal,
        );
        QueuedRequest::new(request, 1.0, Instant::now())
    }

    fn cfs() -> CompletelyFairScheduler {
        let weights = HashMap::from([("double".to_string(), 2.0)]);
        CompletelyFairScheduler::new(weights, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_first_user_starts_at_zero() {
        let mut cfs = cfs();
        cfs.push(queued("a1", "alice"));
        assert_eq!(cfs.user_vruntime("alice"), Some(0.0));
        assert_eq!(cfs.entries()[0].virtual_runtime, 0.0);
    }

    #[tokio::test]
    async fn test_runtime_advances_by_slice_over_weight() {
        let mut cfs = cfs();
        cfs.push(queued("a1", "alice"));
        cfs.push(queued("d1", "double"));

        assert_eq!(cfs.pop_next().unwrap().id(), "a1");
        assert_eq!(cfs.pop_next().unwrap().id(), "d1");

        let slice = Duration::from_millis(100).as_nanos() as f64;
        assert_eq!(cfs.user_vruntime("alice"), Some(slice / 1024.0));
        assert_eq!(cfs.user_vruntime("double"), Some(slice / 2048.0));
    }

    #[tokio::test]
    async fn test_new_user_seeded_at_minimum() {
        let mut cfs = cfs();
        cfs.push(queued("a1", "alice"));
        cfs.push(queued("d1", "double"));
        cfs.pop_next();
        cfs.pop_next();

        let min = cfs.user_vruntime("double").unwrap();
        let max = cfs.user_vruntime("alice").unwrap();
        assert!(min > 0.0 && min < max);

        cfs.push(queued("n1", "newcomer"));
        assert_eq!(cfs.user_vruntime("newcomer"), Some(min));
        assert_eq!(cfs.entries()[0].virtual_runtime, min);
    }

    #[tokio::test]
    async fn test_one_user_cannot_monopolize() {
        let mut cfs = cfs();
        cfs.push(queued("a1", "alice"));
        cfs.push(queued("a2", "alice"));
        cfs.push(queued("b1", "bob"));

        let order: Vec<String> = (0..3).map(|_| cfs.pop_next().unwrap().id().to_string()).collect();
        assert_eq!(order, vec!["a1", "b1", "a2"]);
    }

    #[tokio::test]
    async fn test_boost_divides_runtime() {
        let mut cfs = cfs();
        cfs.push(queued("a1", "alice"));
        cfs.push(queued("a2", "alice"));
        cfs.pop_next();

        let before = cfs.entries()[0].virtual_runtime;
        let after = cfs.boost("a2", 2.0).unwrap();
        assert_eq!(after, before / 2.0);
    }
}
