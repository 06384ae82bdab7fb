//! Fair admission scheduling
//!
//! [`FairScheduler`] owns one queue for the configured
//! [`SchedulingAlgorithm`] plus the starvation tracker, load bookkeeping
//! and fairness metrics shared by all algorithms.

pub mod cfs;
pub mod fair;
pub mod load_balancer;
pub mod lottery;
pub mod metrics;
pub mod priority;
pub mod starvation;
pub mod types;
pub mod wrr;

pub use fair::{FairScheduler, SchedulerConfig};
pub use load_balancer::LoadSnapshot;
pub use metrics::SchedulerMetrics;
pub use types::{QueuedRequest, SchedulingAlgorithm, VRuntimeRequest};
