//! Cycle scoring used for adaptive policy selection
//!
//! The scores are a simplified model that only holds for pure cycles:
//! every node gets the same centrality, and the cluster coefficient is
//! zero because a simple cycle has no triangles.

use serde::Serialize;
use std::collections::HashMap;

use super::policy::ResolutionPolicy;
use super::types::Deadlock;

/// Centrality above which a node counts as critical
const CRITICAL_CENTRALITY: f64 = 0.7;

/// Path length at or below which a node counts as critical
const CRITICAL_PATH_LENGTH: usize = 2;

/// Derived metrics for one deadlock cycle. Computed per attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphAnalysis {
    pub cycle_length: usize,
    pub centrality: HashMap<String, f64>,
    pub path_lengths: HashMap<String, usize>,
    pub cluster_coefficient: f64,
    pub critical_nodes: Vec<String>,
    pub resolution_complexity: usize,
}

impl GraphAnalysis {
    /// Analyze the cycle of `deadlock`
    pub fn of(deadlock: &Deadlock) -> Self {
        let len = deadlock.cycle.len();
        let centrality_score = if len <= 2 { 1.0 } else { 1.0 / len as f64 };
        let path_length = len / 2;

        let mut analysis = Self {
            cycle_length: len,
            cluster_coefficient: 0.0,
            ..Default::default()
        };

        for node in &deadlock.cycle {
            analysis.centrality.insert(node.clone(), centrality_score);
            analysis.path_lengths.insert(node.clone(), path_length);

            if centrality_score > CRITICAL_CENTRALITY
                && path_length <= CRITICAL_PATH_LENGTH
                && !analysis.critical_nodes.contains(node)
            {
                analysis.critical_nodes.push(node.clone());
            }
        }

        analysis.resolution_complexity = len * analysis.critical_nodes.len();
        analysis
    }

    /// Situational multiplier for `policy` given this cycle
    pub fn situational_bonus(&self, policy: ResolutionPolicy) -> f64 {
        match policy {
            ResolutionPolicy::LowestPriority if self.resolution_complexity > 10 => 1.5,
            ResolutionPolicy::YoungestFirst if self.cycle_length <= 3 => 1.3,
            ResolutionPolicy::Fifo if self.cluster_coefficient > 0.5 => 1.2,
            ResolutionPolicy::Random if self.critical_nodes.len() * 2 > self.cycle_length => 1.4,
            _ => 1.0,
        }
    }
}

/// Historical success multiplier: `0.5 + successes / attempts`, or 1.0 untried
pub fn history_factor(attempts: u64, successes: u64) -> f64 {
    if attempts == 0 {
        return 1.0;
    }
    0.5 + successes as f64 / attempts as f64
}

/// Default base weights for adaptive selection
pub fn default_policy_weights() -> HashMap<ResolutionPolicy, f64> {
    HashMap::from([
        (ResolutionPolicy::LowestPriority, 1.0),
        (ResolutionPolicy::YoungestFirst, 0.8),
        (ResolutionPolicy::Fifo, 0.6),
        (ResolutionPolicy::Lifo, 0.6),
        (ResolutionPolicy::Random, 0.3),
    ])
}
