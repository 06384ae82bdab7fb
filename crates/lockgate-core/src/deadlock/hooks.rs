//! Resolution and preemption hooks
//!
//! Hooks observe the resolution pipeline. A failing hook is logged and
//! skipped; it never blocks or aborts a resolution.

use async_trait::async_trait;
use tracing::info;

use super::types::Deadlock;
use crate::domain::locking::Lock;
use crate::error::Result;

/// Callbacks around basic deadlock resolution
#[async_trait]
pub trait ResolutionHook: Send + Sync {
    /// Called after the victim is chosen, before it is removed from the graph
    async fn before_resolution(&self, deadlock: &Deadlock, victim: &str) -> Result<()>;

    /// Called once the deadlock is marked resolved
    async fn after_resolution(&self, deadlock: &Deadlock);
}

/// Callbacks around forcibly releasing a victim's lock
#[async_trait]
pub trait PreemptionHook: Send + Sync {
    /// Called before the victim's lock is released
    async fn before_preemption(&self, deadlock: &Deadlock, victim: &Lock) -> Result<()>;

    /// Called after the release attempt; `success` is false when the release failed
    async fn after_preemption(&self, deadlock: &Deadlock, victim: &Lock, success: bool)
    -> Result<()>;
}

/// Hook that writes every resolution and preemption to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHook;

#[async_trait]
impl ResolutionHook for LoggingHook {
    async fn before_resolution(&self, deadlock: &Deadlock, victim: &str) -> Result<()> {
        info!(
            deadlock_id = %deadlock.id,
            victim = %victim,
            cycle_length = deadlock.len(),
            "Resolving deadlock"
        );
        Ok(())
    }

    async fn after_resolution(&self, deadlock: &Deadlock) {
        info!(
            deadlock_id = %deadlock.id,
            victim = deadlock.victim_id.as_deref().unwrap_or(""),
            "Deadlock resolved"
        );
    }
}

#[async_trait]
impl PreemptionHook for LoggingHook {
    async fn before_preemption(&self, deadlock: &Deadlock, victim: &Lock) -> Result<()> {
        info!(
            deadlock_id = %deadlock.id,
            lock_id = %victim.id,
            owner = %victim.owner,
            priority = %victim.priority,
            "Preempting lock"
        );
        Ok(())
    }

    async fn after_preemption(
        &self,
        deadlock: &Deadlock,
        victim: &Lock,
        success: bool,
    ) -> Result<()> {
        info!(
            deadlock_id = %deadlock.id,
            lock_id = %victim.id,
            success,
            "Preemption finished"
        );
        Ok(())
    }
}
