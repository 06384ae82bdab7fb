//! Advanced deadlock resolver
//!
//! Wraps a [`DeadlockDetector`] and resolves deadlocks using the locks that
//! participate in the cycle, which the caller supplies. Victims are chosen
//! by real priority and acquisition-time comparisons, the policy itself can
//! be picked adaptively from cycle shape and past success, and failed
//! attempts fall back through the remaining policies.
//!
//! The resolver never touches the wait-for graph directly; victim removal
//! goes through [`DeadlockDetector::resolve_with_victim`], so resolution
//! hooks registered on the detector see every victim.
//!
//! After a successful resolution a cascade check runs in the background.
//! It resolves the cycles still in the graph through the same policy path,
//! using the locks supplied with the triggering call. Cycles whose locks
//! are unknown or above the preemption threshold stay unresolved. A
//! cascade never spawns another cascade.

use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::analysis::{GraphAnalysis, default_policy_weights, history_factor};
use super::detector::DeadlockDetector;
use super::hooks::PreemptionHook;
use super::policy::ResolutionPolicy;
use super::stats::ResolutionStats;
use super::types::Deadlock;
use crate::domain::locking::{Lock, LockReleaser, Priority};
use crate::error::{Error, Result};

/// Configuration for the advanced resolver
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    /// Policy used when adaptive selection is off or undecided
    pub default_policy: ResolutionPolicy,

    /// Base weight per policy for adaptive selection. Unlisted and
    /// zero-weight policies are never picked; the default is used instead.
    pub policy_weights: HashMap<ResolutionPolicy, f64>,

    pub enable_adaptive_policy: bool,

    /// Whether victims' locks are released through the backend
    pub enable_preemption: bool,

    /// Locks above this priority are never chosen as victims
    pub preemption_threshold: Priority,

    /// Primary attempt plus fallbacks
    pub max_resolution_attempts: usize,

    /// How long a victim is shielded from being chosen again
    pub victim_history_ttl: Duration,

    pub enable_cascade_resolution: bool,
    pub enable_priority_boost: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            default_policy: ResolutionPolicy::LowestPriority,
            policy_weights: default_policy_weights(),
            enable_adaptive_policy: true,
            enable_preemption: true,
            preemption_threshold: Priority::High,
            max_resolution_attempts: 3,
            victim_history_ttl: Duration::from_secs(300), // 5 minutes
            enable_cascade_resolution: true,
            enable_priority_boost: true,
        }
    }
}

impl ResolverConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_resolution_attempts == 0 {
            return Err(Error::ConfigError(
                "max_resolution_attempts must be at least 1".to_string(),
            ));
        }

        for (policy, weight) in &self.policy_weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(Error::ConfigError(format!(
                    "policy weight for '{}' must be a non-negative number, got {}",
                    policy, weight
                )));
            }
        }

        Ok(())
    }

    /// Set the default policy and turn adaptive selection off
    pub fn fixed_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.default_policy = policy;
        self.enable_adaptive_policy = false;
        self
    }

    /// Set the victim cooldown
    pub fn with_victim_history_ttl(mut self, ttl: Duration) -> Self {
        self.victim_history_ttl = ttl;
        self
    }
}

/// Resolves deadlocks using lock metadata
///
/// Clones share configuration, history, statistics and hooks.
#[derive(Clone)]
pub struct DeadlockResolver {
    detector: Arc<DeadlockDetector>,
    releaser: Option<Arc<dyn LockReleaser>>,
    config: Arc<RwLock<ResolverConfig>>,
    victim_history: Arc<RwLock<HashMap<String, Instant>>>,
    pending_boosts: Arc<RwLock<HashMap<String, u8>>>,
    stats: Arc<RwLock<ResolutionStats>>,
    hooks: Arc<RwLock<Vec<Arc<dyn PreemptionHook>>>>,
    cascades: TaskTracker,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for DeadlockResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlockResolver")
            .field("detector", &self.detector)
            .field("has_releaser", &self.releaser.is_some())
            .finish_non_exhaustive()
    }
}

impl DeadlockResolver {
    /// Create a resolver over `detector`
    pub fn new(detector: Arc<DeadlockDetector>, config: ResolverConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            detector,
            releaser: None,
            config: Arc::new(RwLock::new(config)),
            victim_history: Arc::new(RwLock::new(HashMap::new())),
            pending_boosts: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(ResolutionStats::default())),
            hooks: Arc::new(RwLock::new(Vec::new())),
            cascades: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Release preempted victims through `releaser`
    pub fn with_releaser(mut self, releaser: Arc<dyn LockReleaser>) -> Self {
        self.releaser = Some(releaser);
        self
    }

    /// The wrapped detector
    pub fn detector(&self) -> &Arc<DeadlockDetector> {
        &self.detector
    }

    /// Current configuration
    pub async fn config(&self) -> ResolverConfig {
        self.config.read().await.clone()
    }

    /// Replace the configuration after validating it
    pub async fn update_config(&self, config: ResolverConfig) -> Result<()> {
        config.validate()?;
        *self.config.write().await = config;
        info!("Resolver configuration updated");
        Ok(())
    }

    /// Register a hook run around every preemption
    pub async fn add_preemption_hook(&self, hook: Arc<dyn PreemptionHook>) {
        self.hooks.write().await.push(hook);
    }

    /// Independent copy of the resolution statistics
    pub async fn get_resolution_stats(&self) -> ResolutionStats {
        self.stats.read().await.clone()
    }

    /// Pending priority boost for `owner`, consumed on read
    pub async fn take_priority_boost(&self, owner: &str) -> u8 {
        self.pending_boosts.write().await.remove(owner).unwrap_or(0)
    }

    /// Cancel in-flight cascade checks and wait for them to exit
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.cascades.close();
        self.cascades.wait().await;
        debug!("Resolver shut down");
    }

    /// Wait for cascade checks spawned so far to finish
    pub async fn wait_for_cascades(&self) {
        self.cascades.close();
        self.cascades.wait().await;
        self.cascades.reopen();
    }

    // ========== Resolution ==========

    /// Resolve `deadlock` given the locks that participate in it.
    ///
    /// Picks a policy, tries it, and falls back through the remaining
    /// policies on failure. On success the post-resolution effects
    /// (cascade re-check, priority boost) run if enabled.
    pub async fn resolve_deadlock_advanced(&self, deadlock: &mut Deadlock, locks: &[Lock]) -> Result<()> {
        if deadlock.resolved {
            return Ok(());
        }

        let victim = self.resolve_once(deadlock, locks).await?;
        self.record_priority_boost(&victim).await;
        self.spawn_cascade(locks).await;
        Ok(())
    }

    /// Policy selection, primary attempt and fallbacks, with outcome stats
    async fn resolve_once(&self, deadlock: &mut Deadlock, locks: &[Lock]) -> Result<Lock> {
        let started = Instant::now();
        let analysis = GraphAnalysis::of(deadlock);
        let policy = self.select_optimal_policy(deadlock, &analysis).await;

        info!(
            deadlock_id = %deadlock.id,
            policy = %policy,
            cycle_length = deadlock.len(),
            complexity = analysis.resolution_complexity,
            "Resolving deadlock"
        );

        let result = match self.resolve_with_policy(deadlock, locks, policy).await {
            Ok(victim) => Ok(victim),
            Err(e) => {
                warn!(deadlock_id = %deadlock.id, policy = %policy, error = %e, "Primary resolution failed");
                self.try_fallback_resolution(deadlock, locks, policy, e).await
            }
        };

        self.stats
            .write()
            .await
            .record_outcome(result.is_ok(), started.elapsed());

        result
    }

    /// Score each weighted policy for this cycle and pick the best
    pub async fn select_optimal_policy(&self, deadlock: &Deadlock, analysis: &GraphAnalysis) -> ResolutionPolicy {
        let config = self.config.read().await;
        if !config.enable_adaptive_policy {
            return config.default_policy;
        }

        let stats = self.stats.read().await;
        let score = |policy: ResolutionPolicy| -> Option<f64> {
            let base = config.policy_weights.get(&policy)?;
            let (attempts, successes) = stats.policy_record(policy);
            let score = base * analysis.situational_bonus(policy) * history_factor(attempts, successes);
            (score > 0.0).then_some(score)
        };

        let mut best = config.default_policy;
        let mut best_score = score(best).unwrap_or(f64::NEG_INFINITY);

        for policy in ResolutionPolicy::ALL {
            if let Some(s) = score(policy) {
                if s > best_score {
                    best = policy;
                    best_score = s;
                }
            }
        }

        debug!(deadlock_id = %deadlock.id, policy = %best, score = best_score, "Selected resolution policy");
        best
    }

    /// Resolve with one specific policy. Returns the preempted lock.
    pub async fn resolve_with_policy(
        &self,
        deadlock: &mut Deadlock,
        locks: &[Lock],
        policy: ResolutionPolicy,
    ) -> Result<Lock> {
        let config = self.config.read().await.clone();
        self.stats.write().await.record_attempt(policy);

        let candidates: Vec<&Lock> = locks
            .iter()
            .filter(|lock| lock.cycle_node(&deadlock.cycle).is_some())
            .filter(|lock| lock.priority <= config.preemption_threshold)
            .collect();

        let chosen = pick_victim(policy, &candidates).ok_or_else(|| {
            Error::ResolutionFailed(format!(
                "no preemptible lock in cycle for policy '{}'",
                policy
            ))
        })?;

        let victim = self
            .apply_cooldown(chosen, &candidates, &deadlock.cycle, config.victim_history_ttl)
            .await
            .clone();

        let node = victim
            .cycle_node(&deadlock.cycle)
            .map(str::to_string)
            .ok_or_else(|| Error::ResolutionFailed("victim is not in the cycle".to_string()))?;

        self.preempt(deadlock, &victim, &config).await?;

        self.victim_history
            .write()
            .await
            .insert(node.clone(), Instant::now());

        self.detector.resolve_with_victim(deadlock, &node).await?;

        self.stats.write().await.record_success(policy, victim.priority);
        Ok(victim)
    }

    /// Try the fallback policies after `failed` returned `error`
    pub async fn try_fallback_resolution(
        &self,
        deadlock: &mut Deadlock,
        locks: &[Lock],
        failed: ResolutionPolicy,
        error: Error,
    ) -> Result<Lock> {
        let max_fallbacks = self
            .config
            .read()
            .await
            .max_resolution_attempts
            .saturating_sub(1);

        let mut attempts = 0;
        let mut last_error = error.to_string();

        for policy in ResolutionPolicy::FALLBACK_ORDER
            .into_iter()
            .filter(|p| *p != failed)
            .take(max_fallbacks)
        {
            attempts += 1;
            match self.resolve_with_policy(deadlock, locks, policy).await {
                Ok(victim) => {
                    info!(deadlock_id = %deadlock.id, policy = %policy, "Fallback resolution succeeded");
                    return Ok(victim);
                }
                Err(e) => {
                    debug!(deadlock_id = %deadlock.id, policy = %policy, error = %e, "Fallback policy failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(Error::AllFallbacksFailed {
            attempts,
            last_error,
        })
    }

    /// Swap a recently victimized choice for another candidate, if any
    async fn apply_cooldown<'a>(
        &self,
        chosen: &'a Lock,
        candidates: &[&'a Lock],
        cycle: &[String],
        ttl: Duration,
    ) -> &'a Lock {
        let mut history = self.victim_history.write().await;
        history.retain(|_, at| at.elapsed() < ttl);

        let Some(recent) = chosen.cycle_node(cycle).filter(|n| history.contains_key(*n)) else {
            return chosen;
        };

        let mut by_priority = candidates.to_vec();
        by_priority.sort_by_key(|lock| lock.priority);

        match by_priority
            .into_iter()
            .find(|lock| lock.cycle_node(cycle) != Some(recent))
        {
            Some(alternative) => {
                debug!(
                    recent_victim = %recent,
                    alternative = %alternative.id,
                    "Recent victim in cooldown, choosing alternative"
                );
                alternative
            }
            None => chosen,
        }
    }

    /// Release the victim's lock with hooks around the call
    async fn preempt(&self, deadlock: &Deadlock, victim: &Lock, config: &ResolverConfig) -> Result<()> {
        if !config.enable_preemption {
            return Ok(());
        }

        let hooks = self.hooks.read().await.clone();

        for hook in &hooks {
            if let Err(e) = hook.before_preemption(deadlock, victim).await {
                warn!(deadlock_id = %deadlock.id, lock_id = %victim.id, error = %e, "Preemption hook failed");
            }
        }

        let released = match &self.releaser {
            Some(releaser) => releaser.release(victim).await,
            None => Ok(()),
        };

        for hook in &hooks {
            if let Err(e) = hook
                .after_preemption(deadlock, victim, released.is_ok())
                .await
            {
                warn!(deadlock_id = %deadlock.id, lock_id = %victim.id, error = %e, "Preemption hook failed");
            }
        }

        released
    }

    async fn record_priority_boost(&self, victim: &Lock) {
        if !self.config.read().await.enable_priority_boost {
            return;
        }

        let mut boosts = self.pending_boosts.write().await;
        let pending = boosts.entry(victim.owner.clone()).or_insert(0);
        *pending = pending.saturating_add(1);
        debug!(owner = %victim.owner, boost = *pending, "Recorded priority boost for victim owner");
    }

    async fn spawn_cascade(&self, locks: &[Lock]) {
        if !self.config.read().await.enable_cascade_resolution || self.shutdown.is_cancelled() {
            return;
        }

        let resolver = self.clone();
        let locks = locks.to_vec();
        let cancel = self.shutdown.clone();

        self.cascades.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => debug!("Cascade check cancelled"),
                resolved = resolver.cascade_check(&locks) => {
                    resolver.stats.write().await.cascade_resolutions += 1;
                    debug!(resolved, "Cascade check finished");
                }
            }
        });
    }

    /// Resolve the cycles left in the graph. Returns how many were resolved.
    async fn cascade_check(&self, locks: &[Lock]) -> usize {
        let deadlocks = match self.detector.check_for_deadlocks().await {
            Ok(deadlocks) => deadlocks,
            Err(e) => {
                warn!(error = %e, "Cascade detection failed");
                return 0;
            }
        };

        let mut removed: Vec<String> = Vec::new();
        for mut deadlock in deadlocks {
            // Broken by an earlier victim of this pass
            if deadlock.cycle.iter().any(|node| removed.contains(node)) {
                continue;
            }

            match self.resolve_once(&mut deadlock, locks).await {
                Ok(victim) => {
                    self.record_priority_boost(&victim).await;
                    removed.extend(deadlock.victim_id.clone());
                }
                Err(e) => {
                    warn!(deadlock_id = %deadlock.id, error = %e, "Cascade left deadlock unresolved");
                }
            }
        }

        removed.len()
    }
}

fn pick_victim<'a>(policy: ResolutionPolicy, candidates: &[&'a Lock]) -> Option<&'a Lock> {
    let locks = candidates.iter().copied();
    match policy {
        ResolutionPolicy::LowestPriority => locks.min_by_key(|l| l.priority),
        ResolutionPolicy::Fifo => locks.min_by_key(|l| l.acquired_at),
        ResolutionPolicy::Lifo | ResolutionPolicy::YoungestFirst => {
            locks.max_by_key(|l| l.acquired_at)
        }
        ResolutionPolicy::Random => candidates.choose(&mut rand::thread_rng()).copied(),
    }
}
