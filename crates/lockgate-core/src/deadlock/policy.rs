//! Victim selection policies

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// How a deadlock victim is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Abort the most recently acquired lock
    Lifo,
    /// Abort the oldest lock
    Fifo,
    /// Abort the lowest priority lock
    LowestPriority,
    /// Abort the youngest lock
    #[serde(rename = "youngest")]
    YoungestFirst,
    /// Abort a random cycle member
    Random,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self::LowestPriority
    }
}

impl ResolutionPolicy {
    /// Every policy, in declaration order
    pub const ALL: [ResolutionPolicy; 5] = [
        ResolutionPolicy::Lifo,
        ResolutionPolicy::Fifo,
        ResolutionPolicy::LowestPriority,
        ResolutionPolicy::YoungestFirst,
        ResolutionPolicy::Random,
    ];

    /// Order in which fallback policies are tried after a failure
    pub const FALLBACK_ORDER: [ResolutionPolicy; 5] = [
        ResolutionPolicy::LowestPriority,
        ResolutionPolicy::YoungestFirst,
        ResolutionPolicy::Fifo,
        ResolutionPolicy::Lifo,
        ResolutionPolicy::Random,
    ];

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lifo => "lifo",
            Self::Fifo => "fifo",
            Self::LowestPriority => "lowest_priority",
            Self::YoungestFirst => "youngest",
            Self::Random => "random",
        }
    }
}

impl fmt::Display for ResolutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResolutionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lifo" => Ok(Self::Lifo),
            "fifo" => Ok(Self::Fifo),
            "lowest_priority" => Ok(Self::LowestPriority),
            "youngest" | "youngest_first" => Ok(Self::YoungestFirst),
            "random" => Ok(Self::Random),
            _ => Err(Error::UnsupportedPolicy(s.to_string())),
        }
    }
}
