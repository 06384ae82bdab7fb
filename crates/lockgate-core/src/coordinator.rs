//! Admission coordinator
//!
//! A waiting request lives in two places: the detector's wait-for graph and
//! the scheduler's queue. Queueing, admission and cancellation go through
//! this type so the two never disagree.
//!
//! Victims leave the graph through the detector, whichever path chose them:
//! the background scan, the resolver and its cascade checks, or
//! [`AdmissionCoordinator::resolve_deadlocks`]. The coordinator registers a
//! resolution hook on the detector that drops each victim from the queue.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::deadlock::{Deadlock, DeadlockDetector, DeadlockResolver, ResolutionHook};
use crate::domain::locking::{Lock, LockRequest};
use crate::error::Result;
use crate::scheduler::FairScheduler;

/// Outcome of asking for a lock that is currently held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    /// Wait edges recorded and request queued
    Queued,
    /// Waiting would close a cycle; nothing was recorded
    Refused,
}

/// Drops resolution victims from the scheduler's queue
#[derive(Debug)]
struct VictimEviction {
    scheduler: Arc<FairScheduler>,
}

#[async_trait]
impl ResolutionHook for VictimEviction {
    async fn before_resolution(&self, _deadlock: &Deadlock, _victim: &str) -> Result<()> {
        Ok(())
    }

    async fn after_resolution(&self, deadlock: &Deadlock) {
        let Some(victim) = deadlock.victim_id.as_deref() else {
            return;
        };

        if self.scheduler.cancel(victim).await {
            debug!(deadlock_id = %deadlock.id, victim = %victim, "Dropped queued victim request");
        }
    }
}

/// Keeps the detector and scheduler in step
#[derive(Debug, Clone)]
pub struct AdmissionCoordinator {
    detector: Arc<DeadlockDetector>,
    scheduler: Arc<FairScheduler>,
    resolver: Option<Arc<DeadlockResolver>>,
}

impl AdmissionCoordinator {
    /// Pair `detector` and `scheduler`, subscribing the scheduler to victims
    pub async fn new(detector: Arc<DeadlockDetector>, scheduler: Arc<FairScheduler>) -> Self {
        detector
            .add_resolution_hook(Arc::new(VictimEviction {
                scheduler: Arc::clone(&scheduler),
            }))
            .await;

        Self {
            detector,
            scheduler,
            resolver: None,
        }
    }

    /// Use `resolver` for victim selection and priority boosts
    pub fn with_resolver(mut self, resolver: Arc<DeadlockResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn detector(&self) -> &Arc<DeadlockDetector> {
        &self.detector
    }

    pub fn scheduler(&self) -> &Arc<FairScheduler> {
        &self.scheduler
    }

    pub fn resolver(&self) -> Option<&Arc<DeadlockResolver>> {
        self.resolver.as_ref()
    }

    /// Register `request` as waiting behind `blocked_by` and queue it.
    ///
    /// The cycle check and the edge commit are one atomic step. A pending
    /// priority boost for the requesting user is applied before queueing.
    pub async fn request_lock(&self, mut request: LockRequest, blocked_by: &[Lock]) -> Result<Admission> {
        if !self
            .detector
            .try_add_lock_request(&request, blocked_by)
            .await?
        {
            info!(request_id = %request.id, user = %request.user, "Lock request refused to avoid deadlock");
            return Ok(Admission::Refused);
        }

        if let Some(resolver) = &self.resolver {
            let steps = resolver.take_priority_boost(&request.user).await;
            if steps > 0 {
                let boosted = request.priority.raised(steps);
                debug!(
                    request_id = %request.id,
                    from = %request.priority,
                    to = %boosted,
                    "Applied pending priority boost"
                );
                request.priority = boosted;
            }
        }

        let request_id = request.id.clone();
        if let Err(e) = self.scheduler.enqueue(request).await {
            self.detector.remove_lock_request(&request_id).await;
            return Err(e);
        }

        Ok(Admission::Queued)
    }

    /// Admit the next request chosen by the scheduler
    pub async fn admit_next(&self) -> Result<Option<LockRequest>> {
        let Some(request) = self.scheduler.schedule().await? else {
            return Ok(None);
        };

        self.detector.remove_lock_request(&request.id).await;
        debug!(request_id = %request.id, "Request admitted");
        Ok(Some(request))
    }

    /// Withdraw a waiting request. Returns whether it was queued.
    pub async fn cancel(&self, request_id: &str) -> bool {
        let was_queued = self.scheduler.cancel(request_id).await;
        self.detector.remove_lock_request(request_id).await;
        was_queued
    }

    /// Record that `lock` was acquired
    pub async fn record_acquisition(&self, lock: &Lock) {
        self.detector.add_lock_acquisition(lock).await;
    }

    /// Find and resolve current deadlocks.
    ///
    /// Uses the resolver (with `locks` as the cycle participants) when one
    /// is configured, the detector's basic resolution otherwise. Failures
    /// are logged and the remaining deadlocks are still attempted. Queued
    /// victims are dropped by the eviction hook.
    pub async fn resolve_deadlocks(&self, locks: &[Lock]) -> Result<Vec<Deadlock>> {
        let mut resolved = Vec::new();

        for mut deadlock in self.detector.check_for_deadlocks().await? {
            let outcome = match &self.resolver {
                Some(resolver) => resolver.resolve_deadlock_advanced(&mut deadlock, locks).await,
                None => self.detector.resolve_deadlock(&mut deadlock).await,
            };

            if let Err(e) = outcome {
                warn!(deadlock_id = %deadlock.id, error = %e, "Could not resolve deadlock");
                continue;
            }
            resolved.push(deadlock);
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadlock::{DetectorConfig, ResolutionPolicy, ResolverConfig};
    use crate::domain::locking::{Priority, ResourceIdentifier};
    use crate::scheduler::SchedulerConfig;

    fn resource() -> ResourceIdentifier {
        ResourceIdentifier::new("acme", "db", "prod")
    }

    fn request(id: &str, user: &str) -> LockRequest {
        LockRequest::with_id(id, resource(), user, Priority::Normal)
    }

    fn lock(owner: &str, priority: Priority) -> Lock {
        Lock::new(format!("lock-{}", owner), resource(), owner, priority)
    }

    async fn coordinator() -> AdmissionCoordinator {
        AdmissionCoordinator::new(
            Arc::new(DeadlockDetector::new(DetectorConfig::default())),
            Arc::new(FairScheduler::with_defaults()),
        )
        .await
    }

    #[tokio::test]
    async fn test_queue_and_admit_keep_both_sides_in_step() {
        let coordinator = coordinator().await;
        let admission = coordinator
            .request_lock(request("alice", "alice"), &[lock("bob", Priority::Normal)])
            .await
            .unwrap();
        assert_eq!(admission, Admission::Queued);
        assert_eq!(coordinator.scheduler().queue_len().await, 1);
        assert!(coordinator.detector().graph_snapshot().await.has_edge("alice", "bob"));

        let admitted = coordinator.admit_next().await.unwrap().unwrap();
        assert_eq!(admitted.id, "alice");
        assert_eq!(coordinator.scheduler().queue_len().await, 0);
        // bob was only an owner and goes with the last request waiting on it
        assert!(coordinator.detector().graph_snapshot().await.is_empty());
        assert!(coordinator.admit_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cycle_closing_request_is_refused() {
        let coordinator = coordinator().await;
        coordinator
            .request_lock(request("alice", "alice"), &[lock("bob", Priority::Normal)])
            .await
            .unwrap();

        let admission = coordinator
            .request_lock(request("bob", "bob"), &[lock("alice", Priority::Normal)])
            .await
            .unwrap();
        assert_eq!(admission, Admission::Refused);
        assert_eq!(coordinator.scheduler().queue_len().await, 1);
        assert_eq!(coordinator.detector().metrics().await.prevented_deadlocks, 1);
    }

    #[tokio::test]
    async fn test_cancel_removes_from_both() {
        let coordinator = coordinator().await;
        coordinator
            .request_lock(request("alice", "alice"), &[lock("bob", Priority::Normal)])
            .await
            .unwrap();

        assert!(coordinator.cancel("alice").await);
        assert!(!coordinator.cancel("alice").await);
        assert_eq!(coordinator.detector().graph_stats().await.edges, 0);
        assert_eq!(coordinator.detector().metrics().await.waiting_requests, 0);
    }

    #[tokio::test]
    async fn test_duplicate_request_rolls_back_graph() {
        let coordinator = coordinator().await;
        coordinator.scheduler().enqueue(request("dup", "alice")).await.unwrap();

        let err = coordinator
            .request_lock(request("dup", "alice"), &[lock("bob", Priority::Normal)])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E800");
        assert!(!coordinator.detector().graph_snapshot().await.contains_node("dup"));
    }

    #[tokio::test]
    async fn test_victim_owner_gets_priority_boost() {
        let detector = Arc::new(DeadlockDetector::new(DetectorConfig::default().with_prevention(false)));
        let mut config = ResolverConfig::default().fixed_policy(ResolutionPolicy::LowestPriority);
        config.enable_cascade_resolution = false;
        let resolver = Arc::new(DeadlockResolver::new(detector.clone(), config).unwrap());
        let coordinator = AdmissionCoordinator::new(detector, Arc::new(FairScheduler::with_defaults()))
            .await
            .with_resolver(resolver);

        let locks = [lock("alice", Priority::Low), lock("bob", Priority::Normal)];
        coordinator
            .request_lock(request("alice", "alice"), &locks[1..])
            .await
            .unwrap();
        coordinator
            .request_lock(request("bob", "bob"), &locks[..1])
            .await
            .unwrap();

        let resolved = coordinator.resolve_deadlocks(&locks).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].victim_id.as_deref(), Some("alice"));
        // The victim's queued request is gone from the scheduler too
        let queued: Vec<String> = coordinator
            .scheduler()
            .queued_requests()
            .await
            .into_iter()
            .map(|q| q.request.id)
            .collect();
        assert_eq!(queued, vec!["bob".to_string()]);

        coordinator
            .request_lock(request("alice-retry", "alice"), &[])
            .await
            .unwrap();
        let retry = coordinator
            .scheduler()
            .queued_requests()
            .await
            .into_iter()
            .find(|q| q.request.id == "alice-retry")
            .unwrap();
        assert_eq!(retry.priority, Priority::High);
    }

    #[tokio::test]
    async fn test_basic_resolution_without_resolver() {
        let detector = Arc::new(DeadlockDetector::new(DetectorConfig::default().with_prevention(false)));
        let scheduler = Arc::new(FairScheduler::new(SchedulerConfig::default()).unwrap());
        let coordinator = AdmissionCoordinator::new(detector, scheduler).await;

        coordinator
            .request_lock(request("alice", "alice"), &[lock("bob", Priority::Normal)])
            .await
            .unwrap();
        coordinator
            .request_lock(request("bob", "bob"), &[lock("alice", Priority::Normal)])
            .await
            .unwrap();

        let resolved = coordinator.resolve_deadlocks(&[]).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].resolved);
        assert_eq!(coordinator.scheduler().queue_len().await, 1);
    }

    #[tokio::test]
    async fn test_resolution_outside_coordinator_still_evicts_victim() {
        let detector = Arc::new(DeadlockDetector::new(DetectorConfig::default().with_prevention(false)));
        let coordinator = AdmissionCoordinator::new(detector.clone(), Arc::new(FairScheduler::with_defaults())).await;

        coordinator
            .request_lock(request("alice", "alice"), &[lock("bob", Priority::Normal)])
            .await
            .unwrap();
        coordinator
            .request_lock(request("bob", "bob"), &[lock("alice", Priority::Normal)])
            .await
            .unwrap();

        // Straight to the detector, bypassing the coordinator
        assert_eq!(detector.run_detection_pass().await, 1);
        assert_eq!(coordinator.scheduler().queue_len().await, 1);
        let queued = coordinator.scheduler().queued_requests().await;
        assert!(detector.graph_snapshot().await.contains_node(&queued[0].request.id));
    }
}
