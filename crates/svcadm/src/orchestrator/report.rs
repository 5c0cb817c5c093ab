//! Per-service outcomes of orchestrator operations

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, ServiceError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ServiceOutcome {
    Started { container_id: String },
    Failed { reason: String },
    Skipped { missing: Vec<String> },
}

impl ServiceOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started { .. })
    }
}

impl fmt::Display for ServiceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { container_id } => {
                let short = container_id.get(..12).unwrap_or(container_id);
                write!(f, "started ({short})")
            }
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            Self::Skipped { missing } => {
                write!(f, "skipped, missing {}", missing.join(", "))
            }
        }
    }
}

/// Result of `start_services`: the schedule and what happened to each
/// service in it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartReport {
    pub batches: Vec<Vec<String>>,
    pub outcomes: BTreeMap<String, ServiceOutcome>,
}

impl StartReport {
    pub fn new(batches: Vec<Vec<String>>) -> Self {
        Self {
            batches,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, service: impl Into<String>, outcome: ServiceOutcome) {
        self.outcomes.insert(service.into(), outcome);
    }

    pub fn outcome(&self, service: &str) -> Option<&ServiceOutcome> {
        self.outcomes.get(service)
    }

    pub fn is_started(&self, service: &str) -> bool {
        self.outcome(service).is_some_and(ServiceOutcome::is_started)
    }

    /// Services that did not start, in schedule order
    pub fn unsuccessful(&self) -> Vec<String> {
        self.batches
            .iter()
            .flatten()
            .filter(|name| !self.is_started(name))
            .cloned()
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.unsuccessful().is_empty()
    }

    pub fn into_result(self) -> Result<Self> {
        let unsuccessful = self.unsuccessful();
        if unsuccessful.is_empty() {
            Ok(self)
        } else {
            Err(ServiceError::OperationFailed {
                operation: "setup".to_string(),
                services: unsuccessful,
            })
        }
    }
}

/// Result of an unordered fan-out (cleanup, backup)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationReport {
    pub operation: String,
    pub succeeded: Vec<String>,
    pub failures: BTreeMap<String, String>,
}

impl OperationReport {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, service: impl Into<String>, result: Result<()>) {
        let service = service.into();
        match result {
            Ok(()) => self.succeeded.push(service),
            Err(e) => {
                self.failures.insert(service, e.to_string());
            }
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ServiceError::OperationFailed {
                operation: self.operation.clone(),
                services: self.failures.keys().cloned().collect(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_report_lists_unsuccessful_in_schedule_order() {
        let mut report = StartReport::new(vec![
            vec!["postgresql".to_string(), "vault".to_string()],
            vec!["sonarqube".to_string()],
        ]);
        report.record(
            "postgresql",
            ServiceOutcome::Failed {
                reason: "boom".to_string(),
            },
        );
        report.record(
            "vault",
            ServiceOutcome::Started {
                container_id: "0123456789abcdef".to_string(),
            },
        );
        report.record(
            "sonarqube",
            ServiceOutcome::Skipped {
                missing: vec!["postgresql".to_string()],
            },
        );

        assert_eq!(report.unsuccessful(), vec!["postgresql", "sonarqube"]);
        assert_eq!(report.outcome("vault").unwrap().to_string(), "started (0123456789ab)");
        match report.into_result() {
            Err(ServiceError::OperationFailed { services, .. }) => {
                assert_eq!(services, vec!["postgresql", "sonarqube"]);
            }
            other => panic!("Expected OperationFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_operation_report() {
        let mut report = OperationReport::new("backup");
        report.record("postgresql", Ok(()));
        assert!(report.clone().into_result().is_ok());

        report.record("gitlab", Err(ServiceError::UnknownService("x".to_string())));
        assert!(!report.is_success());
        assert_eq!(report.failures.len(), 1);
    }
}
