//! Deadlock detector
//!
//! Owns the wait-for graph and keeps it in step with lock requests and
//! acquisitions. A background loop periodically scans for cycles and
//! resolves each one found.
//!
//! Victim selection here is by policy name only: the graph holds bare
//! identifiers, so LIFO/FIFO/lowest-priority/youngest pick a fixed end of
//! the cycle. Selection that compares real priorities and acquisition
//! times lives in [`DeadlockResolver`](super::DeadlockResolver), which is
//! given the locks in the cycle.
//!
//! `prevent_deadlock` followed by `add_lock_request` leaves a window in
//! which a concurrent request can close a cycle between the two calls.
//! `try_add_lock_request` performs the check and the commit in one write
//! section and has no such window.

use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::graph::{GraphStats, WaitForGraph};
use super::hooks::ResolutionHook;
use super::metrics::{DeadlockMetrics, DeadlockMetricsSnapshot};
use super::policy::ResolutionPolicy;
use super::types::Deadlock;
use crate::domain::locking::{Lock, LockRequest};
use crate::error::{Error, Result};

/// Configuration for deadlock detection
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Master switch; when off every operation is a successful no-op
    pub enabled: bool,

    /// Interval between background scans
    pub check_interval: Duration,

    /// Waits longer than this are reported as overdue
    pub max_wait_time: Duration,

    /// Policy used by the basic victim selection
    pub resolution_policy: ResolutionPolicy,

    /// Number of resolved deadlocks kept for diagnostics
    pub history_size: usize,

    /// Whether speculative prevention checks run
    pub enable_prevention: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: Duration::from_secs(30),
            max_wait_time: Duration::from_secs(300), // 5 minutes
            resolution_policy: ResolutionPolicy::LowestPriority,
            history_size: 1000,
            enable_prevention: true,
        }
    }
}

impl DetectorConfig {
    /// Configuration with detection switched off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Set the scan interval
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Set the basic resolution policy
    pub fn with_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.resolution_policy = policy;
        self
    }

    /// Enable or disable prevention checks
    pub fn with_prevention(mut self, enabled: bool) -> Self {
        self.enable_prevention = enabled;
        self
    }

    /// Set the history ring size
    pub fn with_history_size(mut self, size: usize) -> Self {
        self.history_size = size;
        self
    }

    /// Set the overdue-wait threshold
    pub fn with_max_wait_time(mut self, max_wait: Duration) -> Self {
        self.max_wait_time = max_wait;
        self
    }
}

#[derive(Debug, Default)]
struct DetectorState {
    graph: WaitForGraph,
    /// When each waiting request first blocked
    waiting_since: HashMap<String, Instant>,
}

struct DetectionLoop {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Detects and resolves deadlocks in the wait-for graph
pub struct DeadlockDetector {
    config: DetectorConfig,
    state: RwLock<DetectorState>,
    metrics: DeadlockMetrics,
    hooks: RwLock<Vec<Arc<dyn ResolutionHook>>>,
    runner: Mutex<Option<DetectionLoop>>,
}

impl std::fmt::Debug for DeadlockDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlockDetector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeadlockDetector {
    /// Create a detector with its own metrics
    pub fn new(config: DetectorConfig) -> Self {
        let metrics = DeadlockMetrics::new(config.history_size);
        Self::with_metrics(config, metrics)
    }

    /// Create a detector reporting into an existing metrics handle
    pub fn with_metrics(config: DetectorConfig, metrics: DeadlockMetrics) -> Self {
        Self {
            config,
            state: RwLock::new(DetectorState::default()),
            metrics,
            hooks: RwLock::new(Vec::new()),
            runner: Mutex::new(None),
        }
    }

    /// Create a detector with default configuration
    pub fn with_defaults() -> Self {
        Self::new(DetectorConfig::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Metrics handle shared with this detector
    pub fn metrics_handle(&self) -> DeadlockMetrics {
        self.metrics.clone()
    }

    /// Independent copy of the detector metrics
    pub async fn metrics(&self) -> DeadlockMetricsSnapshot {
        self.metrics.snapshot().await
    }

    /// Node and edge counts of the live graph
    pub async fn graph_stats(&self) -> GraphStats {
        self.state.read().await.graph.stats()
    }

    /// Deep copy of the live graph
    pub async fn graph_snapshot(&self) -> WaitForGraph {
        self.state.read().await.graph.clone()
    }

    // ========== Lifecycle ==========

    /// Start the background detection loop.
    ///
    /// Does nothing if detection is disabled or the loop is already
    /// running. The loop exits when `cancel` fires or [`stop`](Self::stop)
    /// is called, whichever comes first.
    pub async fn start(self: &Arc<Self>, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("Deadlock detection is disabled");
            return;
        }

        let mut runner = self.runner.lock().await;
        if runner.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }

        info!(
            check_interval_ms = self.config.check_interval.as_millis(),
            "Starting deadlock detector"
        );

        let stop = CancellationToken::new();
        let detector = Arc::clone(self);
        let loop_stop = stop.clone();
        let handle = tokio::spawn(async move { detector.detect_loop(cancel, loop_stop).await });

        *runner = Some(DetectionLoop { stop, handle });
    }

    /// Stop the background loop and wait for it to exit
    pub async fn stop(&self) {
        let Some(running) = self.runner.lock().await.take() else {
            return;
        };

        info!("Stopping deadlock detector");
        running.stop.cancel();
        if let Err(e) = running.handle.await {
            warn!(error = %e, "Deadlock detection loop ended abnormally");
        }
    }

    /// Whether the background loop is running
    pub async fn is_running(&self) -> bool {
        self.runner
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    async fn detect_loop(&self, cancel: CancellationToken, stop: CancellationToken) {
        let period = self.config.check_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_detection_pass().await;
                }
            }
        }

        debug!("Deadlock detection loop exited");
    }

    /// One scan: find cycles, resolve each, report overdue waits.
    ///
    /// Returns the number of deadlocks resolved. Errors are logged.
    pub async fn run_detection_pass(&self) -> usize {
        let mut resolved = 0;

        match self.check_for_deadlocks().await {
            Ok(deadlocks) => {
                for mut deadlock in deadlocks {
                    match self.resolve_deadlock(&mut deadlock).await {
                        Ok(()) => resolved += 1,
                        Err(e) => {
                            error!(deadlock_id = %deadlock.id, error = %e, "Error resolving deadlock")
                        }
                    }
                }
            }
            Err(e) => error!(error = %e, "Error during deadlock detection"),
        }

        let overdue = self.overdue_requests().await;
        if !overdue.is_empty() {
            warn!(
                count = overdue.len(),
                max_wait_ms = self.config.max_wait_time.as_millis(),
                "Requests waiting longer than the maximum wait time"
            );
        }

        resolved
    }

    // ========== Graph bookkeeping ==========

    /// Record that `request` is blocked by each lock in `blocked_by`
    pub async fn add_lock_request(&self, request: &LockRequest, blocked_by: &[Lock]) -> Result<()> {
        if !self.config.enabled || blocked_by.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        self.commit_wait(&mut state, request, blocked_by);
        Ok(())
    }

    /// Record the wait edges only if they do not close a cycle.
    ///
    /// The cycle check and the commit happen under one write section. Returns
    /// `false` (and records nothing) if admitting the wait would deadlock.
    pub async fn try_add_lock_request(
        &self,
        request: &LockRequest,
        blocked_by: &[Lock],
    ) -> Result<bool> {
        if !self.config.enabled || blocked_by.is_empty() {
            return Ok(true);
        }

        let mut state = self.state.write().await;

        if self.config.enable_prevention && would_deadlock(&state.graph, request, blocked_by) {
            self.metrics.inc_prevented();
            info!(request_id = %request.id, "Prevented potential deadlock");
            return Ok(false);
        }

        self.commit_wait(&mut state, request, blocked_by);
        Ok(true)
    }

    fn commit_wait(&self, state: &mut DetectorState, request: &LockRequest, blocked_by: &[Lock]) {
        for lock in blocked_by {
            state.graph.add_edge(request.id.as_str(), lock.owner.as_str());
        }

        if !state.waiting_since.contains_key(&request.id) {
            state.waiting_since.insert(request.id.clone(), Instant::now());
            self.metrics.inc_waiting();
        }

        debug!(
            request_id = %request.id,
            blockers = blocked_by.len(),
            "Recorded lock wait"
        );
    }

    /// Forget a request (granted, cancelled or timed out)
    pub async fn remove_lock_request(&self, request_id: &str) {
        if !self.config.enabled {
            return;
        }

        let mut state = self.state.write().await;
        self.remove_node_locked(&mut state, request_id);
    }

    /// Record that `lock` was acquired; its node no longer waits
    pub async fn add_lock_acquisition(&self, lock: &Lock) {
        if !self.config.enabled {
            return;
        }

        let mut state = self.state.write().await;
        self.remove_node_locked(&mut state, &lock.id);
    }

    /// Remove `node`, then drop the owners it waited on once nothing
    /// waits on them and they wait on nothing themselves
    fn remove_node_locked(&self, state: &mut DetectorState, node: &str) {
        let owners = state.graph.waits_for(node).to_vec();
        state.graph.remove_node(node);
        if state.waiting_since.remove(node).is_some() {
            self.metrics.dec_waiting();
        }

        for owner in owners {
            if !state.waiting_since.contains_key(&owner) {
                state.graph.remove_isolated(&owner);
            }
        }
    }

    /// Requests that have waited longer than `max_wait_time`
    pub async fn overdue_requests(&self) -> Vec<String> {
        let state = self.state.read().await;
        let max_wait = self.config.max_wait_time;

        let mut overdue: Vec<String> = state
            .waiting_since
            .iter()
            .filter(|(_, since)| since.elapsed() > max_wait)
            .map(|(id, _)| id.clone())
            .collect();
        overdue.sort();
        overdue
    }

    // ========== Detection ==========

    /// Scan the graph for cycles. Does not modify the graph.
    pub async fn check_for_deadlocks(&self) -> Result<Vec<Deadlock>> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }

        let cycles = self.state.read().await.graph.find_cycles();

        let deadlocks: Vec<Deadlock> = cycles
            .into_iter()
            .map(|cycle| {
                let mut deadlock = Deadlock::new(cycle);
                deadlock.annotate(self.config.resolution_policy);
                deadlock
            })
            .collect();

        if !deadlocks.is_empty() {
            self.metrics.inc_detected(deadlocks.len() as u64);
            warn!(count = deadlocks.len(), "Detected deadlocks");
        }

        Ok(deadlocks)
    }

    /// Check whether admitting `request` behind `blocked_by` would deadlock.
    ///
    /// Returns `true` when the wait is safe. The live graph is not changed;
    /// see the module docs for the race with a later `add_lock_request`.
    pub async fn prevent_deadlock(&self, request: &LockRequest, blocked_by: &[Lock]) -> Result<bool> {
        if !self.config.enable_prevention {
            return Ok(true);
        }

        let state = self.state.read().await;
        if would_deadlock(&state.graph, request, blocked_by) {
            self.metrics.inc_prevented();
            info!(request_id = %request.id, "Prevented potential deadlock");
            return Ok(false);
        }

        Ok(true)
    }

    // ========== Resolution ==========

    /// Register a hook run around every resolution
    pub async fn add_resolution_hook(&self, hook: Arc<dyn ResolutionHook>) {
        self.hooks.write().await.push(hook);
    }

    /// Resolve `deadlock` using the configured basic policy
    pub async fn resolve_deadlock(&self, deadlock: &mut Deadlock) -> Result<()> {
        if deadlock.resolved {
            return Ok(());
        }

        info!(
            deadlock_id = %deadlock.id,
            policy = %self.config.resolution_policy,
            "Resolving deadlock"
        );

        let victim = self.select_victim(&deadlock.cycle).ok_or_else(|| {
            Error::ResolutionFailed("failed to select victim for deadlock resolution".to_string())
        })?;

        self.resolve_with_victim(deadlock, &victim).await
    }

    /// Resolve `deadlock` by removing `victim` from the graph.
    ///
    /// Runs `before_resolution` hooks, marks the deadlock resolved, removes
    /// the victim node, records metrics and history, then runs
    /// `after_resolution` hooks. Hook failures are logged only.
    pub async fn resolve_with_victim(&self, deadlock: &mut Deadlock, victim: &str) -> Result<()> {
        if deadlock.resolved {
            return Ok(());
        }
        if victim.is_empty() {
            return Err(Error::ResolutionFailed("empty victim id".to_string()));
        }

        let hooks = self.hooks.read().await.clone();

        for hook in &hooks {
            if let Err(e) = hook.before_resolution(deadlock, victim).await {
                warn!(deadlock_id = %deadlock.id, error = %e, "Resolution hook failed");
            }
        }

        deadlock.mark_resolved(victim);

        {
            let mut state = self.state.write().await;
            self.remove_node_locked(&mut state, victim);
        }

        self.metrics.inc_resolved();
        self.metrics.record_resolution(deadlock).await;

        for hook in &hooks {
            hook.after_resolution(deadlock).await;
        }

        info!(deadlock_id = %deadlock.id, victim = %victim, "Deadlock resolved");
        Ok(())
    }

    /// Basic victim selection by policy name
    fn select_victim(&self, cycle: &[String]) -> Option<String> {
        match self.config.resolution_policy {
            ResolutionPolicy::Lifo => cycle.first().cloned(),
            ResolutionPolicy::Fifo => cycle.last().cloned(),
            ResolutionPolicy::LowestPriority => cycle.first().cloned(),
            ResolutionPolicy::YoungestFirst => cycle.first().cloned(),
            ResolutionPolicy::Random => cycle.choose(&mut rand::thread_rng()).cloned(),
        }
    }
}

/// Whether adding `request`'s wait edges to `graph` would close a cycle
fn would_deadlock(graph: &WaitForGraph, request: &LockRequest, blocked_by: &[Lock]) -> bool {
    let mut speculative = graph.clone();
    for lock in blocked_by {
        speculative.add_edge(request.id.as_str(), lock.owner.as_str());
    }
    speculative.has_cycle()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::locking::{Priority, ResourceIdentifier};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn resource() -> ResourceIdentifier {
        ResourceIdentifier::new("acme/infra", "network", "default")
    }

    fn request(id: &str) -> LockRequest {
        LockRequest::with_id(id, resource(), id, Priority::Normal)
    }

    fn held_by(owner: &str) -> Lock {
        Lock::new(format!("lock-{}", owner), resource(), owner, Priority::Normal)
    }

    /// Build a -> b -> c -> a out of request/owner edges
    async fn three_cycle(detector: &DeadlockDetector) {
        detector.add_lock_request(&request("a"), &[held_by("b")]).await.unwrap();
        detector.add_lock_request(&request("b"), &[held_by("c")]).await.unwrap();
        detector.add_lock_request(&request("c"), &[held_by("a")]).await.unwrap();
    }

    #[derive(Default)]
    struct CountingHook {
        before: AtomicUsize,
        after: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ResolutionHook for CountingHook {
        async fn before_resolution(&self, _deadlock: &Deadlock, _victim: &str) -> Result<()> {
            self.before.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::HookFailed("refused".into()));
            }
            Ok(())
        }

        async fn after_resolution(&self, deadlock: &Deadlock) {
            assert!(deadlock.resolved);
            self.after.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_add_and_remove_request() {
        let detector = DeadlockDetector::with_defaults();
        detector
            .add_lock_request(&request("r1"), &[held_by("alice"), held_by("bob")])
            .await
            .unwrap();

        assert_eq!(detector.graph_stats().await, GraphStats { nodes: 3, edges: 2 });
        assert_eq!(detector.metrics_handle().waiting_requests(), 1);

        detector.remove_lock_request("r1").await;
        // Owners with no remaining waiters go with the request
        assert_eq!(detector.graph_stats().await, GraphStats::default());
        assert_eq!(detector.metrics_handle().waiting_requests(), 0);
    }

    #[tokio::test]
    async fn test_acquisition_removes_lock_node() {
        let detector = DeadlockDetector::with_defaults();
        let lock = Lock::new("lock-x", resource(), "x", Priority::Normal);
        detector.add_lock_request(&request("lock-x"), &[held_by("y")]).await.unwrap();

        detector.add_lock_acquisition(&lock).await;
        assert!(!detector.graph_snapshot().await.contains_node("lock-x"));
    }

    #[tokio::test]
    async fn test_no_deadlock_in_chain() {
        let detector = DeadlockDetector::with_defaults();
        detector.add_lock_request(&request("a"), &[held_by("b")]).await.unwrap();
        detector.add_lock_request(&request("b"), &[held_by("c")]).await.unwrap();

        assert!(detector.check_for_deadlocks().await.unwrap().is_empty());
        assert_eq!(detector.metrics().await.deadlocks_detected, 0);
    }

    #[tokio::test]
    async fn test_check_is_read_only() {
        let detector = DeadlockDetector::with_defaults();
        three_cycle(&detector).await;

        let before = detector.graph_stats().await;
        let deadlocks = detector.check_for_deadlocks().await.unwrap();
        assert_eq!(deadlocks.len(), 1);
        assert_eq!(deadlocks[0].metadata["cycle_length"], 3);
        assert_eq!(deadlocks[0].metadata["resolution_policy"], "lowest_priority");
        assert_eq!(detector.graph_stats().await, before);
        assert_eq!(detector.metrics().await.deadlocks_detected, 1);
    }

    #[tokio::test]
    async fn test_resolution_postcondition() {
        let detector = DeadlockDetector::with_defaults();
        three_cycle(&detector).await;

        let nodes_before = detector.graph_stats().await.nodes;
        let mut deadlock = detector.check_for_deadlocks().await.unwrap().remove(0);
        detector.resolve_deadlock(&mut deadlock).await.unwrap();

        assert!(deadlock.resolved);
        let victim = deadlock.victim_id.clone().unwrap();
        assert!(!victim.is_empty());
        assert!(!detector.graph_snapshot().await.contains_node(&victim));
        assert_eq!(detector.graph_stats().await.nodes, nodes_before - 1);
        assert!(detector.check_for_deadlocks().await.unwrap().is_empty());

        let metrics = detector.metrics().await;
        assert_eq!(metrics.deadlocks_resolved, 1);
        assert_eq!(metrics.resolution_history.len(), 1);
    }

    #[tokio::test]
    async fn test_resolving_twice_is_noop() {
        let detector = DeadlockDetector::with_defaults();
        three_cycle(&detector).await;

        let mut deadlock = detector.check_for_deadlocks().await.unwrap().remove(0);
        detector.resolve_deadlock(&mut deadlock).await.unwrap();
        let victim = deadlock.victim_id.clone();
        detector.resolve_deadlock(&mut deadlock).await.unwrap();

        assert_eq!(deadlock.victim_id, victim);
        assert_eq!(detector.metrics().await.deadlocks_resolved, 1);
    }

    #[tokio::test]
    async fn test_empty_cycle_fails_resolution() {
        let detector = DeadlockDetector::with_defaults();
        let mut deadlock = Deadlock::new(Vec::new());
        let err = detector.resolve_deadlock(&mut deadlock).await.unwrap_err();
        assert!(matches!(err, Error::ResolutionFailed(_)));
        assert!(!deadlock.resolved);
    }

    #[tokio::test]
    async fn test_basic_policies_pick_cycle_ends() {
        let cycle = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let pick = |policy| {
            DeadlockDetector::new(DetectorConfig::default().with_policy(policy)).select_victim(&cycle)
        };

        assert_eq!(pick(ResolutionPolicy::Lifo).as_deref(), Some("a"));
        assert_eq!(pick(ResolutionPolicy::Fifo).as_deref(), Some("c"));
        assert_eq!(pick(ResolutionPolicy::LowestPriority).as_deref(), Some("a"));
        assert_eq!(pick(ResolutionPolicy::YoungestFirst).as_deref(), Some("a"));
        assert!(cycle.contains(&pick(ResolutionPolicy::Random).unwrap()));
    }

    #[tokio::test]
    async fn test_prevention_refuses_two_cycle() {
        let detector = DeadlockDetector::with_defaults();
        // a waits for b
        detector.add_lock_request(&request("a"), &[held_by("b")]).await.unwrap();

        // b waiting for a would close the cycle
        let allowed = detector
            .prevent_deadlock(&request("b"), &[held_by("a")])
            .await
            .unwrap();
        assert!(!allowed);

        // b waiting for unrelated c is safe
        let allowed = detector
            .prevent_deadlock(&request("b"), &[held_by("c")])
            .await
            .unwrap();
        assert!(allowed);

        // Checking never changes the live graph
        assert_eq!(detector.graph_stats().await, GraphStats { nodes: 2, edges: 1 });
        assert_eq!(detector.metrics().await.prevented_deadlocks, 1);
    }

    #[tokio::test]
    async fn test_prevention_disabled_always_allows() {
        let detector = DeadlockDetector::new(DetectorConfig::default().with_prevention(false));
        detector.add_lock_request(&request("a"), &[held_by("b")]).await.unwrap();
        assert!(detector.prevent_deadlock(&request("b"), &[held_by("a")]).await.unwrap());
    }

    #[tokio::test]
    async fn test_try_add_checks_and_commits_atomically() {
        let detector = DeadlockDetector::with_defaults();
        assert!(detector.try_add_lock_request(&request("a"), &[held_by("b")]).await.unwrap());
        assert!(!detector.try_add_lock_request(&request("b"), &[held_by("a")]).await.unwrap());

        let graph = detector.graph_snapshot().await;
        assert!(graph.has_edge("a", "b"));
        assert!(!graph.has_edge("b", "a"));
        assert!(detector.try_add_lock_request(&request("b"), &[held_by("c")]).await.unwrap());
        assert!(detector.graph_snapshot().await.has_edge("b", "c"));
    }

    #[tokio::test]
    async fn test_disabled_detector_is_noop() {
        let detector = Arc::new(DeadlockDetector::new(DetectorConfig::disabled()));
        three_cycle(&detector).await;

        assert_eq!(detector.graph_stats().await.nodes, 0);
        assert!(detector.check_for_deadlocks().await.unwrap().is_empty());

        detector.start(CancellationToken::new()).await;
        assert!(!detector.is_running().await);
    }

    #[tokio::test]
    async fn test_hooks_run_and_failures_are_not_fatal() {
        let detector = DeadlockDetector::with_defaults();
        let failing = Arc::new(CountingHook {
            fail: true,
            ..Default::default()
        });
        let ok = Arc::new(CountingHook::default());
        detector.add_resolution_hook(failing.clone()).await;
        detector.add_resolution_hook(ok.clone()).await;

        three_cycle(&detector).await;
        let mut deadlock = detector.check_for_deadlocks().await.unwrap().remove(0);
        detector.resolve_deadlock(&mut deadlock).await.unwrap();

        assert!(deadlock.resolved);
        assert_eq!(failing.before.load(Ordering::SeqCst), 1);
        assert_eq!(failing.after.load(Ordering::SeqCst), 1);
        assert_eq!(ok.after.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_resolves_and_stops() {
        let detector = Arc::new(DeadlockDetector::new(
            DetectorConfig::default().with_check_interval(Duration::from_secs(1)),
        ));
        three_cycle(&detector).await;

        detector.start(CancellationToken::new()).await;
        // Starting twice does not spawn a second loop
        detector.start(CancellationToken::new()).await;
        assert!(detector.is_running().await);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(detector.metrics().await.deadlocks_resolved, 1);

        detector.stop().await;
        assert!(!detector.is_running().await);
        // Stopping again is harmless
        detector.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_token_stops_loop() {
        let detector = Arc::new(DeadlockDetector::new(
            DetectorConfig::default().with_check_interval(Duration::from_secs(1)),
        ));
        let cancel = CancellationToken::new();
        detector.start(cancel.clone()).await;
        assert!(detector.is_running().await);

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!detector.is_running().await);

        // A cancelled loop can be restarted
        detector.start(CancellationToken::new()).await;
        assert!(detector.is_running().await);
        detector.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_requests() {
        let detector = DeadlockDetector::new(
            DetectorConfig::default().with_max_wait_time(Duration::from_secs(60)),
        );
        detector.add_lock_request(&request("slow"), &[held_by("x")]).await.unwrap();
        assert!(detector.overdue_requests().await.is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(detector.overdue_requests().await, vec!["slow".to_string()]);
    }
}
