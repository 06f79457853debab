//! Error types for the session grid

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for grid operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while placing, running or routing sessions
#[derive(Debug, Error)]
pub enum Error {
    /// Node is full, draining, or has no free matching slot right now
    #[error("no capacity: {0}")]
    RetryableCapacity(String),

    /// No healthy node can take the request at the moment, but some
    /// registered stereotype supports it
    #[error("no node available: {0}")]
    RetryablePlacement(String),

    /// No registered stereotype anywhere matches the request
    #[error("unsupported capabilities: {0}")]
    Unsupported(String),

    /// A slot was reserved but the session could not be started
    #[error("session creation failed: {0}")]
    CreationFailed(String),

    /// Unknown session or node
    #[error("not found: {0}")]
    NotFound(String),

    /// Queued request waited too long
    #[error("timed out: {0}")]
    Timeout(String),

    /// Internal consistency was broken (e.g. a session owned by two nodes)
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Queued request was dropped by an administrative clear
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Wire-stable discriminant for [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RetryableCapacity,
    RetryablePlacement,
    Unsupported,
    CreationFailed,
    NotFound,
    Timeout,
    InvariantViolation,
    Cancelled,
    Internal,
}

/// Error as carried between a node and the hub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    /// Whether the distributor should try elsewhere or queue instead of
    /// surfacing this to the client
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableCapacity(_) | Self::RetryablePlacement(_))
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::RetryableCapacity(_) => ErrorKind::RetryableCapacity,
            Self::RetryablePlacement(_) => ErrorKind::RetryablePlacement,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::CreationFailed(_) => ErrorKind::CreationFailed,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::InvariantViolation(_) => ErrorKind::InvariantViolation,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Config(_)
            | Self::Io(_)
            | Self::Http(_)
            | Self::Serialization(_)
            | Self::Toml(_) => ErrorKind::Internal,
        }
    }

    /// Message without the kind prefix
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::RetryableCapacity(m)
            | Self::RetryablePlacement(m)
            | Self::Unsupported(m)
            | Self::CreationFailed(m)
            | Self::NotFound(m)
            | Self::Timeout(m)
            | Self::InvariantViolation(m)
            | Self::Cancelled(m)
            | Self::Config(m) => m.clone(),
            other => other.to_string(),
        }
    }

    #[must_use]
    pub fn to_wire(&self) -> WireError {
        WireError {
            kind: self.kind(),
            message: self.message(),
        }
    }
}

impl From<WireError> for Error {
    fn from(wire: WireError) -> Self {
        let WireError { kind, message } = wire;
        match kind {
            ErrorKind::RetryableCapacity => Self::RetryableCapacity(message),
            ErrorKind::RetryablePlacement => Self::RetryablePlacement(message),
            ErrorKind::Unsupported => Self::Unsupported(message),
            ErrorKind::CreationFailed => Self::CreationFailed(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::Timeout => Self::Timeout(message),
            ErrorKind::InvariantViolation => Self::InvariantViolation(message),
            ErrorKind::Cancelled => Self::Cancelled(message),
            ErrorKind::Internal => Self::Io(std::io::Error::other(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_capacity_and_placement_are_retryable() {
        assert!(Error::RetryableCapacity("full".into()).is_retryable());
        assert!(Error::RetryablePlacement("none up".into()).is_retryable());
        assert!(!Error::Unsupported("z".into()).is_retryable());
        assert!(!Error::CreationFailed("boom".into()).is_retryable());
        assert!(!Error::Timeout("late".into()).is_retryable());
    }

    #[test]
    fn wire_error_keeps_kind() {
        let original = Error::RetryableCapacity("node full".into());
        let rebuilt = Error::from(original.to_wire());
        assert!(rebuilt.is_retryable());
        assert_eq!(rebuilt.message(), "node full");

        let json = serde_json::to_string(&Error::NotFound("abc".into()).to_wire()).unwrap();
        assert!(json.contains("not_found"));
    }
}
