//! Health-check collaborator

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::data::Availability;

/// Outcome of a health probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub availability: Availability,
    pub message: String,
}

impl HealthCheckResult {
    #[must_use]
    pub fn up(message: impl Into<String>) -> Self {
        Self {
            availability: Availability::Up,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn down(message: impl Into<String>) -> Self {
        Self {
            availability: Availability::Down,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_down(&self) -> bool {
        self.availability == Availability::Down
    }
}

/// Something a node depends on that can be probed
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> HealthCheckResult;
}
