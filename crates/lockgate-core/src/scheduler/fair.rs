//! Fair scheduler
//!
//! Decides which queued lock request is admitted next. The algorithm is
//! fixed at construction. Every [`FairScheduler::schedule`] call first
//! boosts requests that have waited past the starvation threshold; boosts
//! are uncapped and compound on every pass while the request stays queued.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use super::cfs::CompletelyFairScheduler;
use super::load_balancer::{LoadBalancer, LoadSnapshot};
use super::lottery::LotteryScheduler;
use super::metrics::SchedulerMetrics;
use super::priority::PriorityQueue;
use super::starvation::StarvationTracker;
use super::types::{QueuedRequest, SchedulingAlgorithm, VRuntimeRequest};
use super::wrr::WeightedRoundRobin;
use crate::domain::locking::{LockRequest, Priority};
use crate::error::{Error, Result};

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub algorithm: SchedulingAlgorithm,

    /// Base weight per priority; unlisted priorities weigh `level + 1`
    pub priority_weights: HashMap<Priority, f64>,

    /// Per-user weights (default 1.0)
    pub user_weights: HashMap<String, f64>,

    /// Per-project weights (default 1.0)
    pub project_weights: HashMap<String, f64>,

    /// Runtime charged per admission under CFS
    pub time_slice: Duration,

    /// Wait after which a request counts as starving
    pub starvation_threshold: Duration,

    /// Factor applied to a starving request on every pass
    pub starvation_boost: f64,

    pub enable_load_balancing: bool,
    pub load_balance_window: Duration,

    /// Seed for lottery draws; random when unset
    pub lottery_seed: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            algorithm: SchedulingAlgorithm::Priority,
            priority_weights: HashMap::new(),
            user_weights: HashMap::new(),
            project_weights: HashMap::new(),
            time_slice: Duration::from_millis(100),
            starvation_threshold: Duration::from_secs(30),
            starvation_boost: 1.5,
            enable_load_balancing: true,
            load_balance_window: Duration::from_secs(60),
            lottery_seed: None,
        }
    }
}

impl SchedulerConfig {
    /// Default configuration for `algorithm`
    pub fn for_algorithm(algorithm: SchedulingAlgorithm) -> Self {
        Self {
            algorithm,
            ..Default::default()
        }
    }

    pub fn with_user_weight(mut self, user: impl Into<String>, weight: f64) -> Self {
        self.user_weights.insert(user.into(), weight);
        self
    }

    pub fn with_project_weight(mut self, project: impl Into<String>, weight: f64) -> Self {
        self.project_weights.insert(project.into(), weight);
        self
    }

    pub fn with_starvation(mut self, threshold: Duration, boost: f64) -> Self {
        self.starvation_threshold = threshold;
        self.starvation_boost = boost;
        self
    }

    pub fn with_lottery_seed(mut self, seed: u64) -> Self {
        self.lottery_seed = Some(seed);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.starvation_boost.is_finite() || self.starvation_boost < 1.0 {
            return Err(Error::ConfigError(format!(
                "starvation_boost must be at least 1.0, got {}",
                self.starvation_boost
            )));
        }

        if self.time_slice.is_zero() {
            return Err(Error::ConfigError("time_slice must be positive".to_string()));
        }

        let weights = self
            .priority_weights
            .values()
            .chain(self.user_weights.values())
            .chain(self.project_weights.values());
        for weight in weights {
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(Error::ConfigError(format!(
                    "weights must be positive numbers, got {}",
                    weight
                )));
            }
        }

        Ok(())
    }

    /// Composite weight: priority weight × user weight × project weight
    pub fn weight_for(&self, request: &LockRequest) -> f64 {
        let priority = self
            .priority_weights
            .get(&request.priority)
            .copied()
            .unwrap_or_else(|| f64::from(request.priority.level()) + 1.0);
        let user = self.user_weights.get(&request.user).copied().unwrap_or(1.0);
        let project = self
            .project_weights
            .get(request.project())
            .copied()
            .unwrap_or(1.0);

        priority * user * project
    }
}

/// Queue for the configured algorithm
#[derive(Debug)]
enum AlgorithmQueue {
    Priority(PriorityQueue),
    WeightedRoundRobin(WeightedRoundRobin),
    Lottery(LotteryScheduler),
    Cfs(CompletelyFairScheduler),
}

impl AlgorithmQueue {
    fn new(config: &SchedulerConfig) -> Self {
        match config.algorithm {
            SchedulingAlgorithm::Priority => Self::Priority(PriorityQueue::new()),
            SchedulingAlgorithm::WeightedRoundRobin => Self::WeightedRoundRobin(
                WeightedRoundRobin::new(config.user_weights.clone(), config.project_weights.clone()),
            ),
            SchedulingAlgorithm::Lottery => Self::Lottery(LotteryScheduler::new(config.lottery_seed)),
            SchedulingAlgorithm::Cfs => Self::Cfs(CompletelyFairScheduler::new(
                config.user_weights.clone(),
                config.time_slice,
            )),
        }
    }

    fn push(&mut self, request: QueuedRequest) {
        match self {
            Self::Priority(q) => q.push(request),
            Self::WeightedRoundRobin(q) => q.push(request),
            Self::Lottery(q) => q.push(request),
            Self::Cfs(q) => q.push(request),
        }
    }

    fn pop_next(&mut self) -> Option<QueuedRequest> {
        match self {
            Self::Priority(q) => q.pop_next(),
            Self::WeightedRoundRobin(q) => q.pop_next(),
            Self::Lottery(q) => q.pop_next(),
            Self::Cfs(q) => q.pop_next(),
        }
    }

    /// Apply the algorithm's starvation boost; returns the boosted quantity
    fn boost(&mut self, request_id: &str, factor: f64) -> Option<f64> {
        match self {
            Self::Priority(q) => q.boost(request_id, factor),
            Self::WeightedRoundRobin(q) => q.boost(request_id, factor),
            Self::Lottery(q) => q.boost(request_id, factor).map(|t| t as f64),
            Self::Cfs(q) => q.boost(request_id, factor),
        }
    }

    fn remove(&mut self, request_id: &str) -> Option<QueuedRequest> {
        match self {
            Self::Priority(q) => q.remove(request_id),
            Self::WeightedRoundRobin(q) => q.remove(request_id),
            Self::Lottery(q) => q.remove(request_id),
            Self::Cfs(q) => q.remove(request_id),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Priority(q) => q.len(),
            Self::WeightedRoundRobin(q) => q.len(),
            Self::Lottery(q) => q.len(),
            Self::Cfs(q) => q.len(),
        }
    }

    fn requests(&self) -> Vec<QueuedRequest> {
        match self {
            Self::Priority(q) => q.requests(),
            Self::WeightedRoundRobin(q) => q.requests(),
            Self::Lottery(q) => q.requests(),
            Self::Cfs(q) => q.requests(),
        }
    }
}

#[derive(Debug)]
struct SchedulerState {
    queue: AlgorithmQueue,
    starvation: StarvationTracker,
    load: Option<LoadBalancer>,
    metrics: SchedulerMetrics,
}

/// Fair admission scheduler
#[derive(Debug)]
pub struct FairScheduler {
    config: SchedulerConfig,
    state: RwLock<SchedulerState>,
}

impl FairScheduler {
    /// Create a scheduler after validating `config`
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Create a scheduler with default configuration
    pub fn with_defaults() -> Self {
        Self::build(SchedulerConfig::default())
    }

    fn build(config: SchedulerConfig) -> Self {
        let state = SchedulerState {
            queue: AlgorithmQueue::new(&config),
            starvation: StarvationTracker::new(config.starvation_threshold),
            load: config
                .enable_load_balancing
                .then(|| LoadBalancer::new(config.load_balance_window)),
            metrics: SchedulerMetrics::default(),
        };

        Self {
            config,
            state: RwLock::new(state),
        }
    }

    pub fn algorithm(&self) -> SchedulingAlgorithm {
        self.config.algorithm
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Queue `request` for admission
    pub async fn enqueue(&self, request: LockRequest) -> Result<()> {
        let mut state = self.state.write().await;

        if state.starvation.queued_at(&request.id).is_some() {
            return Err(Error::InvalidInput(format!(
                "request '{}' is already queued",
                request.id
            )));
        }

        let now = Instant::now();
        let weight = self.config.weight_for(&request);
        let queued = QueuedRequest::new(request, weight, now);

        debug!(
            request_id = %queued.id(),
            user = %queued.user(),
            priority = %queued.priority,
            weight,
            algorithm = %self.config.algorithm,
            "Request enqueued"
        );

        state.starvation.track(queued.id(), now);
        state.metrics.record_enqueued();
        state.queue.push(queued);
        Ok(())
    }

    /// Pick the next request to admit, or `None` when nothing is queued
    pub async fn schedule(&self) -> Result<Option<LockRequest>> {
        let mut state = self.state.write().await;
        let now = Instant::now();

        self.apply_anti_starvation(&mut state, now);

        if let Some(load) = state.load.as_mut() {
            if load.rebalance(now) {
                debug!("Load balancing window reset");
            }
        }

        let Some(selected) = state.queue.pop_next() else {
            return Ok(None);
        };

        let wait = state
            .starvation
            .untrack(selected.id())
            .map(|queued_at| now.saturating_duration_since(queued_at));
        state.metrics.record_processed(&selected.request, wait);
        if let Some(load) = state.load.as_mut() {
            load.record(&selected.request);
        }

        debug!(
            request_id = %selected.id(),
            user = %selected.user(),
            algorithm = %self.config.algorithm,
            attempts = selected.attempts,
            "Scheduled request"
        );

        Ok(Some(selected.request))
    }

    fn apply_anti_starvation(&self, state: &mut SchedulerState, now: Instant) {
        let factor = self.config.starvation_boost;

        for request_id in state.starvation.starving(now) {
            let boosted = state.queue.boost(&request_id, factor);
            state.metrics.record_starvation(boosted.is_some());

            if let Some(value) = boosted {
                state.starvation.record_boost(&request_id, now);
                info!(
                    request_id = %request_id,
                    boost = factor,
                    value,
                    "Applied starvation boost"
                );
            }
        }
    }

    /// Remove a queued request. Returns whether it was queued.
    pub async fn cancel(&self, request_id: &str) -> bool {
        let mut state = self.state.write().await;
        state.starvation.untrack(request_id);

        match state.queue.remove(request_id) {
            Some(_) => {
                state.metrics.record_cancelled();
                debug!(request_id = %request_id, "Request cancelled");
                true
            }
            None => false,
        }
    }

    pub async fn queue_len(&self) -> usize {
        self.state.read().await.queue.len()
    }

    /// Snapshot of all queued requests
    pub async fn queued_requests(&self) -> Vec<QueuedRequest> {
        self.state.read().await.queue.requests()
    }

    /// Independent copy of the scheduler metrics
    pub async fn metrics(&self) -> SchedulerMetrics {
        self.state.read().await.metrics.clone()
    }

    /// Load counters for the current window, when load balancing is on
    pub async fn load_snapshot(&self) -> Option<LoadSnapshot> {
        self.state.read().await.load.as_ref().map(LoadBalancer::snapshot)
    }

    /// Boosts applied to a still-queued request
    pub async fn boost_count(&self, request_id: &str) -> usize {
        self.state.read().await.starvation.boost_count(request_id)
    }

    /// Accumulated virtual runtime of `user` (CFS only)
    pub async fn virtual_runtime(&self, user: &str) -> Option<f64> {
        match &self.state.read().await.queue {
            AlgorithmQueue::Cfs(cfs) => cfs.user_vruntime(user),
            _ => None,
        }
    }

    /// Queued entries with their virtual runtimes (CFS only)
    pub async fn virtual_runtime_entries(&self) -> Vec<VRuntimeRequest> {
        match &self.state.read().await.queue {
            AlgorithmQueue::Cfs(cfs) => cfs.entries(),
            _ => Vec::new(),
        }
    }

    /// Cached lottery tickets of `user` (lottery only)
    pub async fn tickets(&self, user: &str) -> Option<u64> {
        match &self.state.read().await.queue {
            AlgorithmQueue::Lottery(lottery) => lottery.tickets(user),
            _ => None,
        }
    }
}
