//! Lock and lock request types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Error;

/// Priority of a lock or lock request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    /// All priorities, lowest first
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::Critical,
    ];

    /// Numeric level (0 = low, 3 = critical)
    pub fn level(&self) -> u8 {
        *self as u8
    }

    /// Priority for a numeric level, saturating at `Critical`
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Self::Low,
            1 => Self::Normal,
            2 => Self::High,
            _ => Self::Critical,
        }
    }

    /// The next priority up, saturating at `Critical`
    pub fn raised(&self, steps: u8) -> Self {
        Self::from_level(self.level().saturating_add(steps))
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "0" => Ok(Self::Low),
            "normal" | "1" => Ok(Self::Normal),
            "high" | "2" => Ok(Self::High),
            "critical" | "3" => Ok(Self::Critical),
            other => Err(Error::InvalidInput(format!("unknown priority '{}'", other))),
        }
    }
}

/// Identifies the resource a lock protects
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    /// Namespace (repository or project), also used as the project dimension for fairness
    pub namespace: String,

    /// Resource name
    pub name: String,

    /// Workspace within the namespace
    pub workspace: String,

    /// Path of the resource
    pub path: String,
}

impl ResourceIdentifier {
    /// Create a resource identifier with an empty path
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        workspace: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            workspace: workspace.into(),
            path: String::new(),
        }
    }

    /// Set the path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Key used for per-resource accounting
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.name, self.workspace)
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// A request to acquire a lock, as handed to the admission core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRequest {
    /// Request ID
    pub id: String,

    /// Resource being requested
    pub resource: ResourceIdentifier,

    /// Requesting user
    pub user: String,

    /// Requested priority
    pub priority: Priority,

    /// How long the caller is willing to wait
    pub timeout: Option<Duration>,

    /// When the request was made
    pub requested_at: DateTime<Utc>,

    /// Free-form metadata
    pub metadata: HashMap<String, String>,
}

impl LockRequest {
    /// Create a new request with a generated ID
    pub fn new(resource: ResourceIdentifier, user: impl Into<String>, priority: Priority) -> Self {
        Self::with_id(format!("req_{}", Uuid::new_v4().simple()), resource, user, priority)
    }

    /// Create a new request with an explicit ID
    pub fn with_id(
        id: impl Into<String>,
        resource: ResourceIdentifier,
        user: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: id.into(),
            resource,
            user: user.into(),
            priority,
            timeout: None,
            requested_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Set the wait timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Project dimension used by the fairness weights
    pub fn project(&self) -> &str {
        &self.resource.namespace
    }
}

/// A lock currently held in the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    /// Lock ID
    pub id: String,

    /// Resource the lock protects
    pub resource: ResourceIdentifier,

    /// Owner (user) holding the lock
    pub owner: String,

    /// Priority the lock was acquired with
    pub priority: Priority,

    /// When the lock was acquired
    pub acquired_at: DateTime<Utc>,

    /// When the lock expires (None = no expiry)
    pub expires_at: Option<DateTime<Utc>>,

    /// Free-form metadata
    pub metadata: HashMap<String, String>,
}

impl Lock {
    /// Create a lock acquired now
    pub fn new(
        id: impl Into<String>,
        resource: ResourceIdentifier,
        owner: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: id.into(),
            resource,
            owner: owner.into(),
            priority,
            acquired_at: Utc::now(),
            expires_at: None,
            metadata: HashMap::new(),
        }
    }

    /// Override the acquisition time
    pub fn acquired_at(mut self, at: DateTime<Utc>) -> Self {
        self.acquired_at = at;
        self
    }

    /// Set an expiry relative to the acquisition time
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at =
            Some(self.acquired_at + chrono::Duration::from_std(ttl).unwrap_or_default());
        self
    }

    /// Check if the lock is expired
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| Utc::now() > exp).unwrap_or(false)
    }

    /// The wait-for graph node this lock occupies within `cycle`, if any.
    ///
    /// Wait edges point at lock owners, so the owner is preferred over the lock ID.
    pub fn cycle_node<'a>(&'a self, cycle: &[String]) -> Option<&'a str> {
        if cycle.iter().any(|n| n == &self.owner) {
            Some(&self.owner)
        } else if cycle.iter().any(|n| n == &self.id) {
            Some(&self.id)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource() -> ResourceIdentifier {
        ResourceIdentifier::new("acme/infra", "network", "default")
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_priority_levels() {
        assert_eq!(Priority::Low.level(), 0);
        assert_eq!(Priority::Critical.level(), 3);
        assert_eq!(Priority::from_level(7), Priority::Critical);
        assert_eq!(Priority::Low.raised(2), Priority::High);
        assert_eq!(Priority::High.raised(5), Priority::Critical);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("0".parse::<Priority>().unwrap(), Priority::Low);
        assert!("urgent".parse::<Priority>().is_err());
        assert_eq!(Priority::Critical.to_string(), "critical");
    }

    #[test]
    fn test_request_creation() {
        let request = LockRequest::new(resource(), "alice", Priority::High)
            .with_timeout(Duration::from_secs(30))
            .with_metadata("pr", "42");

        assert!(request.id.starts_with("req_"));
        assert_eq!(request.project(), "acme/infra");
        assert_eq!(request.timeout, Some(Duration::from_secs(30)));
        assert_eq!(request.metadata["pr"], "42");
    }

    #[test]
    fn test_lock_expiry() {
        let lock = Lock::new("lock-1", resource(), "bob", Priority::Normal)
            .with_ttl(Duration::from_secs(60));
        assert!(lock.expires_at.is_some());
        assert!(!lock.is_expired());

        let old = Lock::new("lock-2", resource(), "bob", Priority::Normal)
            .acquired_at(Utc::now() - chrono::Duration::hours(2))
            .with_ttl(Duration::from_secs(60));
        assert!(old.is_expired());
    }

    #[test]
    fn test_cycle_node_prefers_owner() {
        let lock = Lock::new("lock-1", resource(), "bob", Priority::Normal);
        let cycle = vec!["req-a".to_string(), "bob".to_string()];
        assert_eq!(lock.cycle_node(&cycle), Some("bob"));

        let cycle = vec!["lock-1".to_string(), "req-b".to_string()];
        assert_eq!(lock.cycle_node(&cycle), Some("lock-1"));

        let cycle = vec!["req-c".to_string()];
        assert_eq!(lock.cycle_node(&cycle), None);
    }

    #[test]
    fn test_resource_key() {
        let r = resource().with_path("modules/vpc");
        assert_eq!(r.key(), "acme/infra/network/default");
        assert_eq!(r.path, "modules/vpc");
    }
}
