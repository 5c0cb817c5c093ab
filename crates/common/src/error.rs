//! Error handling for svcadm
//!
//! Configuration errors live here because both the loader in this crate and
//! the validators in `svcadm` produce them. Engine and orchestration errors
//! are defined next to the code that raises them.
//!
//! Library code uses `thiserror`; binaries wrap these in `anyhow`.

use thiserror::Error;

/// Marker for errors raised by svcadm crates.
///
/// All implementors are thread-safe and `'static` so they can cross task
/// boundaries and be boxed into `anyhow::Error`.
pub trait SvcadmError: std::error::Error + Send + Sync + 'static {}

/// Configuration-related errors
///
/// These errors occur during configuration loading, parsing, or validation.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Configuration file cannot be read
    #[error("Cannot read configuration file {path}: {source}")]
    ReadError {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Configuration parsing failed
    #[error("Failed to parse configuration: {details}")]
    ParseError { details: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for {key}: {value} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// Missing required configuration
    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    /// Environment variable error
    #[error("Environment variable error for {var}: {details}")]
    EnvironmentError { var: String, details: String },

    /// One or more fields were rejected by validation
    #[error("Configuration validation failed: {}", .errors.join("; "))]
    ValidationFailed { errors: Vec<String> },
}

impl SvcadmError for ConfigurationError {}

impl ConfigurationError {
    /// Create an invalid value error
    pub fn invalid_value(
        key: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            key: key.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a validation failed error from a list of offending fields
    pub fn validation_failed(errors: Vec<String>) -> Self {
        Self::ValidationFailed { errors }
    }

    /// Offending fields carried by a validation failure, empty otherwise.
    pub fn offending_fields(&self) -> &[String] {
        match self {
            Self::ValidationFailed { errors } => errors,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_display() {
        let err = ConfigurationError::invalid_value("services[0].name", "ngnix", "unknown service");
        let display = format!("{err}");
        assert!(display.contains("services[0].name"));
        assert!(display.contains("ngnix"));
        assert!(display.contains("unknown service"));
    }

    #[test]
    fn test_error_source_chain() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "Access denied");
        let config_err = ConfigurationError::ReadError {
            path: "/root/.svcadm/svcadm.yaml".to_string(),
            source: Box::new(io_error),
        };

        assert!(config_err.source().is_some());
    }

    #[test]
    fn test_validation_failed_lists_every_field() {
        let err = ConfigurationError::validation_failed(vec![
            "general.operator.name: unsupported backend 'lxc'".to_string(),
            "services[1].container.restart: 'on-failure:' is not a restart policy".to_string(),
        ]);

        assert_eq!(err.offending_fields().len(), 2);
        let display = err.to_string();
        assert!(display.contains("general.operator.name"));
        assert!(display.contains("services[1].container.restart"));
    }

    #[test]
    fn test_svcadm_error_trait() {
        fn accepts(_: impl SvcadmError) {}

        accepts(ConfigurationError::MissingRequired {
            key: "general.access.logins".to_string(),
        });
    }
}
