//! Lockgate Core Library
//!
//! This crate provides the admission side of a lock service:
//! - Wait-for graph of blocked requests
//! - Deadlock detection, prevention and basic resolution
//! - Advanced resolution (policy scoring, fallbacks, victim cooldown)
//! - Fair scheduling (priority, weighted round robin, lottery, CFS)
//! - An admission coordinator keeping detector and scheduler in step
//! - File-backed configuration

pub mod config;
pub mod coordinator;
pub mod deadlock;
pub mod domain;
pub mod error;
pub mod scheduler;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::coordinator::{Admission, AdmissionCoordinator};
    pub use crate::deadlock::{
        Deadlock, DeadlockDetector, DeadlockResolver, DetectorConfig, ResolutionPolicy,
        ResolverConfig,
    };
    pub use crate::domain::locking::{Lock, LockRequest, Priority, ResourceIdentifier};
    pub use crate::error::{Error, Result};
    pub use crate::scheduler::{FairScheduler, SchedulerConfig, SchedulingAlgorithm};
}
