//! Backend release seam
//!
//! Preempting a deadlock victim means forcibly releasing its lock in the
//! backend that holds lock state. The backend itself is external; the
//! resolver only needs this one call.

use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;
use tracing::debug;

use super::types::Lock;
use crate::error::{Error, Result};

/// Releases locks held in the external lock backend
#[async_trait]
pub trait LockReleaser: Send + Sync {
    /// Forcibly release `lock`
    async fn release(&self, lock: &Lock) -> Result<()>;
}

/// In-memory releaser that records what it released.
///
/// Useful for simulations and tests. IDs registered with
/// [`InMemoryReleaser::fail_for`] are refused with `ReleaseFailed`.
#[derive(Debug, Default)]
pub struct InMemoryReleaser {
    released: RwLock<Vec<String>>,
    failing: RwLock<HashSet<String>>,
}

impl InMemoryReleaser {
    /// Create an empty releaser
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse releases of the given lock ID from now on
    pub async fn fail_for(&self, lock_id: impl Into<String>) {
        self.failing.write().await.insert(lock_id.into());
    }

    /// IDs of all locks released so far, in release order
    pub async fn released(&self) -> Vec<String> {
        self.released.read().await.clone()
    }
}

#[async_trait]
impl LockReleaser for InMemoryReleaser {
    async fn release(&self, lock: &Lock) -> Result<()> {
        if self.failing.read().await.contains(&lock.id) {
            return Err(Error::ReleaseFailed {
                lock_id: lock.id.clone(),
                reason: "backend refused release".to_string(),
            });
        }

        self.released.write().await.push(lock.id.clone());
        debug!(lock_id = %lock.id, owner = %lock.owner, "Lock released by preemption");
        Ok(())
    }
}
