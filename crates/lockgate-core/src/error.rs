//! Error types for Lockgate

use thiserror::Error;

/// Result type alias using Lockgate's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Lockgate error types
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Resolution errors (E100-E199)
    #[error("Deadlock resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("All fallback resolution policies failed after {attempts} attempts: {last_error}")]
    AllFallbacksFailed { attempts: usize, last_error: String },

    #[error("Failed to release lock '{lock_id}': {reason}")]
    ReleaseFailed { lock_id: String, reason: String },

    // Configuration errors (E200-E299)
    #[error("Unsupported resolution policy '{0}'. Valid options: lifo, fifo, lowest_priority, youngest, random")]
    UnsupportedPolicy(String),

    #[error("Unknown scheduling algorithm '{0}'. Valid options: priority, weighted_round_robin, lottery, cfs")]
    UnknownAlgorithm(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Hook errors (E300-E399)
    #[error("Hook execution failed: {0}")]
    HookFailed(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::ResolutionFailed(_) => "E100",
            Self::AllFallbacksFailed { .. } => "E101",
            Self::ReleaseFailed { .. } => "E102",
            Self::UnsupportedPolicy(_) => "E200",
            Self::UnknownAlgorithm(_) => "E201",
            Self::ConfigError(_) => "E202",
            Self::HookFailed(_) => "E300",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::UnsupportedPolicy(_) => {
                Some("lockgate config set resolution.default_policy lowest_priority".to_string())
            }
            Self::UnknownAlgorithm(_) => {
                Some("lockgate config set scheduling.algorithm priority".to_string())
            }
            Self::ConfigError(_) => Some("lockgate config list".to_string()),
            Self::AllFallbacksFailed { .. } => {
                Some("Supply the locks participating in the cycle to the resolver".to_string())
            }
            _ => None,
        }
    }

    /// Whether the error came from a misconfiguration rather than runtime state
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedPolicy(_) | Self::UnknownAlgorithm(_) | Self::ConfigError(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
