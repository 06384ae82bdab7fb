//! Scheduler types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::locking::{LockRequest, Priority};
use crate::error::Error;

/// Algorithm used to pick the next request to admit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingAlgorithm {
    /// Four priority tiers, least-recently-served user first within a tier
    Priority,
    /// Pooled queue ordered by user and project deficit
    WeightedRoundRobin,
    /// Random draw weighted by per-user tickets
    Lottery,
    /// Lowest virtual runtime first
    Cfs,
}

impl Default for SchedulingAlgorithm {
    fn default() -> Self {
        Self::Priority
    }
}

impl SchedulingAlgorithm {
    pub const ALL: [SchedulingAlgorithm; 4] = [
        SchedulingAlgorithm::Priority,
        SchedulingAlgorithm::WeightedRoundRobin,
        SchedulingAlgorithm::Lottery,
        SchedulingAlgorithm::Cfs,
    ];

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::WeightedRoundRobin => "weighted_round_robin",
            Self::Lottery => "lottery",
            Self::Cfs => "cfs",
        }
    }
}

impl fmt::Display for SchedulingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SchedulingAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "priority" => Ok(Self::Priority),
            "weighted_round_robin" | "wrr" => Ok(Self::WeightedRoundRobin),
            "lottery" => Ok(Self::Lottery),
            "cfs" => Ok(Self::Cfs),
            _ => Err(Error::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// A request waiting in a scheduler queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRequest {
    pub request: LockRequest,
    pub queued_at: Instant,
    pub priority: Priority,

    /// Starts at `priority + 1`; multiplied by starvation boosts
    pub effective_priority: f64,

    /// Composite priority × user × project weight; multiplied by boosts under WRR
    pub weight: f64,

    /// Last boost factor applied, 1.0 when never boosted
    pub starvation_boost: f64,

    /// Scheduling passes this request has waited through
    pub attempts: u32,
}

impl QueuedRequest {
    pub fn new(request: LockRequest, weight: f64, queued_at: Instant) -> Self {
        let priority = request.priority;
        Self {
            request,
            queued_at,
            priority,
            effective_priority: f64::from(priority.level()) + 1.0,
            weight,
            starvation_boost: 1.0,
            attempts: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.request.id
    }

    pub fn user(&self) -> &str {
        &self.request.user
    }

    pub fn project(&self) -> &str {
        self.request.project()
    }

    /// Tier this request competes in: `floor(effective_priority) - 1`,
    /// clamped to the valid range
    pub fn tier(&self) -> Priority {
        let level = (self.effective_priority.floor() - 1.0).clamp(0.0, 3.0);
        Priority::from_level(level as u8)
    }
}

/// A queued request tracked by virtual runtime
#[derive(Debug, Clone, PartialEq)]
pub struct VRuntimeRequest {
    pub queued: QueuedRequest,
    pub virtual_runtime: f64,
    pub time_slice: Duration,
    pub last_scheduled: Option<Instant>,
}
