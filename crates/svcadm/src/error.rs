//! Service lifecycle errors
//!
//! Raised by adapters, the scheduler and the orchestrator. Engine and
//! configuration failures are wrapped so callers can still match on them.

use common::error::{ConfigurationError, SvcadmError};
use thiserror::Error;

use crate::engine::EngineError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigurationError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Dependency cycle detected among: {}", .services.join(", "))]
    DependencyCycle { services: Vec<String> },

    #[error("Skipped {service}: prerequisite(s) {} did not start", .missing.join(", "))]
    SkippedMissingPrereq {
        service: String,
        missing: Vec<String>,
    },

    #[error("Provisioning {service} failed: {reason}")]
    Provisioning { service: String, reason: String },

    #[error("{operation} failed for: {}", .services.join(", "))]
    OperationFailed {
        operation: String,
        services: Vec<String>,
    },

    #[error("Cleanup of {service} left resources behind: {}", .failures.join("; "))]
    CleanupIncomplete {
        service: String,
        failures: Vec<String>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected response: {0}")]
    Json(#[from] serde_json::Error),
}

impl SvcadmError for ServiceError {}

impl ServiceError {
    pub fn provisioning(service: impl Into<String>, reason: impl ToString) -> Self {
        Self::Provisioning {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure came from exhausting a readiness wait
    pub fn is_readiness_timeout(&self) -> bool {
        matches!(self, Self::Engine(EngineError::ReadinessTimeout { .. }))
    }
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;
