//! Deadlock detection and resolution
//!
//! - [`WaitForGraph`]: waits-for edges and cycle enumeration
//! - [`DeadlockDetector`]: graph bookkeeping, periodic scans, basic resolution, prevention
//! - [`DeadlockResolver`]: policy scoring, real victim selection, fallbacks, cooldown

pub mod analysis;
pub mod detector;
pub mod graph;
pub mod hooks;
pub mod metrics;
pub mod policy;
pub mod resolver;
pub mod stats;
pub mod types;

pub use analysis::GraphAnalysis;
pub use detector::{DeadlockDetector, DetectorConfig};
pub use graph::{GraphStats, WaitForGraph};
pub use hooks::{LoggingHook, PreemptionHook, ResolutionHook};
pub use metrics::{DeadlockMetrics, DeadlockMetricsSnapshot};
pub use policy::ResolutionPolicy;
pub use resolver::{DeadlockResolver, ResolverConfig};
pub use stats::ResolutionStats;
pub use types::Deadlock;
