//! Deadlock records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::policy::ResolutionPolicy;

/// A detected deadlock: one cycle of the wait-for graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deadlock {
    /// Deadlock ID
    pub id: String,

    /// Node IDs in the cycle, in discovery order
    pub cycle: Vec<String>,

    /// When the cycle was found
    pub detected_at: DateTime<Utc>,

    /// Whether a victim has been removed
    pub resolved: bool,

    /// When the deadlock was resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,

    /// Node removed to break the cycle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub victim_id: Option<String>,

    /// Diagnostic context (cycle length, detection time, policy used)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Deadlock {
    /// Create an unresolved deadlock for `cycle`
    pub fn new(cycle: Vec<String>) -> Self {
        Self {
            id: format!("deadlock_{}", Uuid::new_v4().simple()),
            cycle,
            detected_at: Utc::now(),
            resolved: false,
            resolved_at: None,
            victim_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Attach detection context
    pub(crate) fn annotate(&mut self, policy: ResolutionPolicy) {
        self.metadata
            .insert("cycle_length".to_string(), serde_json::json!(self.cycle.len()));
        self.metadata.insert(
            "detection_time".to_string(),
            serde_json::json!(self.detected_at.to_rfc3339()),
        );
        self.metadata
            .insert("resolution_policy".to_string(), serde_json::json!(policy.as_str()));
    }

    /// Mark resolved with `victim`
    pub(crate) fn mark_resolved(&mut self, victim: &str) {
        self.resolved = true;
        self.resolved_at = Some(Utc::now());
        self.victim_id = Some(victim.to_string());
    }

    /// Number of nodes in the cycle
    pub fn len(&self) -> usize {
        self.cycle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cycle.is_empty()
    }

    /// Whether `node` participates in the cycle
    pub fn involves(&self, node: &str) -> bool {
        self.cycle.iter().any(|n| n == node)
    }
}
