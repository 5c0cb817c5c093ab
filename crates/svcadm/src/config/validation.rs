//! Configuration validation implementation

use std::collections::HashSet;
use std::path::Path;

use common::config::ConfigValidation;
use common::error::ConfigurationError;
use once_cell::sync::Lazy;
use regex::Regex;

use super::types::{Configuration, PortNumber, ServiceSpec};
use crate::engine::{BackendKind, NetworkDriver, RestartPolicySpec};
use crate::orchestrator::scheduler::DependencyGraph;
use crate::services::ServiceKind;

/// Container, network and volume names
pub static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("Invalid name regex pattern"));

pub static USERNAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]{3,20}$").expect("Invalid username regex pattern"));

pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_PASSWORD_LENGTH: usize = 32;

const FREQUENCIES: [&str; 3] = ["daily", "weekly", "monthly"];

pub fn is_valid_name(name: &str) -> bool {
    NAME_PATTERN.is_match(name)
}

pub fn check_username(username: &str) -> Result<(), String> {
    if USERNAME_PATTERN.is_match(username) {
        Ok(())
    } else {
        Err(format!(
            "'{username}' must be 3-20 characters of letters, digits, '_' or '-'"
        ))
    }
}

pub fn check_password(password: &str) -> Result<(), String> {
    let length = password.chars().count();
    if !(MIN_PASSWORD_LENGTH..=MAX_PASSWORD_LENGTH).contains(&length) {
        return Err(format!(
            "must be {MIN_PASSWORD_LENGTH}-{MAX_PASSWORD_LENGTH} characters, got {length}"
        ));
    }
    if password.starts_with(char::is_whitespace) || password.ends_with(char::is_whitespace) {
        return Err("must not start or end with whitespace".to_string());
    }
    Ok(())
}

pub fn check_port(port: PortNumber) -> Result<(), String> {
    if port.as_u16().is_some() {
        Ok(())
    } else {
        Err(format!("port {port} is outside 0-65535"))
    }
}

/// Accepts exactly what container creation will accept.
pub fn check_restart_policy(policy: &str) -> Result<(), String> {
    RestartPolicySpec::parse(policy).map(|_| ()).map_err(|_| {
        format!("'{policy}' is not one of always, no, unless-stopped, on-failure:N")
    })
}

impl ConfigValidation for Configuration {
    type Error = ConfigurationError;

    fn validate(&self) -> Result<(), Self::Error> {
        let mut errors = Vec::new();

        let operator = &self.general.operator;
        if let Err(e) = operator.name.parse::<BackendKind>() {
            errors.push(format!("general.operator.name: {e}"));
        }
        if !is_valid_name(&operator.network.name) {
            errors.push(format!(
                "general.operator.network.name: '{}' must match {}",
                operator.network.name,
                NAME_PATTERN.as_str()
            ));
        }
        if let Err(e) = operator.network.driver.parse::<NetworkDriver>() {
            errors.push(format!("general.operator.network.driver: {e}"));
        }
        if operator
            .hostname
            .as_deref()
            .is_some_and(|host| host.trim().is_empty())
        {
            errors.push("general.operator.hostname: must not be empty when set".to_string());
        }

        let access = &self.general.access;
        if access.logins.trim().is_empty() {
            errors.push("general.access.logins: path to the users file is required".to_string());
        }
        if access.encryption.enabled {
            if access.encryption.key.is_empty() {
                errors.push(
                    "general.access.encryption.key: required when encryption is enabled"
                        .to_string(),
                );
            }
            if access.encryption.salt.is_empty() {
                errors.push(
                    "general.access.encryption.salt: required when encryption is enabled"
                        .to_string(),
                );
            }
        }

        for key in self.general.containers.labels.keys() {
            if key.trim().is_empty() {
                errors.push("general.containers.labels: label keys must not be empty".to_string());
            }
        }

        let mut seen_services = HashSet::new();
        let mut seen_containers = HashSet::new();
        for (index, service) in self.services.iter().enumerate() {
            let field = format!("services[{index}]");

            if !seen_services.insert(service.name.as_str()) {
                errors.push(format!("{field}.name: duplicate service '{}'", service.name));
            }
            if service.enabled && !seen_containers.insert(service.container.name.as_str()) {
                errors.push(format!(
                    "{field}.container.name: '{}' is used by another enabled service",
                    service.container.name
                ));
            }

            validate_service(&field, service, &mut errors);
        }

        let enabled: Vec<ServiceSpec> = self.enabled_services().cloned().collect();
        let graph = DependencyGraph::for_services(&enabled);
        for (dependent, prerequisite) in graph.missing_prerequisites(&enabled) {
            errors.push(format!(
                "services: '{dependent}' requires '{prerequisite}', which is not enabled"
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::validation_failed(errors))
        }
    }

    fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let proxy_enabled = self
            .enabled_services()
            .any(|service| service.name == ServiceKind::Nginx.as_str());

        for service in self.enabled_services() {
            if service.backup.enabled && !service.persistence.enabled {
                warnings.push(format!(
                    "{}: backups are enabled but persistence is not, data will not survive a restart",
                    service.name
                ));
            }
            if service.proxy_frontend && !proxy_enabled {
                warnings.push(format!(
                    "{}: proxyFrontend is set but nginx is not enabled",
                    service.name
                ));
            }
        }

        warnings
    }
}

fn validate_service(field: &str, service: &ServiceSpec, errors: &mut Vec<String>) {
    if let Err(e) = service.name.parse::<ServiceKind>() {
        errors.push(format!("{field}.name: {e}"));
    }

    if service.image.repository.trim().is_empty() {
        errors.push(format!("{field}.image.repository: must not be empty"));
    }
    if service.image.tag.trim().is_empty() {
        errors.push(format!("{field}.image.tag: must not be empty"));
    }

    let container = &service.container;
    if !is_valid_name(&container.name) {
        errors.push(format!(
            "{field}.container.name: '{}' must match {}",
            container.name,
            NAME_PATTERN.as_str()
        ));
    }
    for (host, target) in &container.ports {
        for port in [host, target] {
            if let Err(reason) = check_port(*port) {
                errors.push(format!("{field}.container.ports: {reason}"));
            }
        }
    }
    if let Err(reason) = check_restart_policy(&container.restart) {
        errors.push(format!("{field}.container.restart: {reason}"));
    }
    for key in container.env.keys() {
        if key.is_empty() || key.contains('=') {
            errors.push(format!("{field}.container.env: invalid variable name '{key}'"));
        }
    }

    if service.persistence.enabled {
        for (volume, mount) in &service.persistence.volumes {
            let is_host_path = Path::new(volume).is_absolute() && Path::new(volume).exists();
            if !is_valid_name(volume) && !is_host_path {
                errors.push(format!(
                    "{field}.persistence.volumes: '{volume}' is neither a volume name nor an existing host path"
                ));
            }
            if !mount.starts_with('/') {
                errors.push(format!(
                    "{field}.persistence.volumes.{volume}: mount path '{mount}' must be absolute"
                ));
            }
        }
    }

    let backup = &service.backup;
    if backup.enabled {
        if !FREQUENCIES.contains(&backup.frequency.as_str()) {
            errors.push(format!(
                "{field}.backup.frequency: '{}' is not one of daily, weekly, monthly",
                backup.frequency
            ));
        }
        if backup.location.trim().is_empty() {
            errors.push(format!("{field}.backup.location: must not be empty"));
        }
    }
    if backup.retention < 0 {
        errors.push(format!(
            "{field}.backup.retention: {} must not be negative",
            backup.retention
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{ImageSpec, ServiceSpec};

    fn service(name: &str) -> ServiceSpec {
        let mut spec = ServiceSpec {
            name: name.to_string(),
            image: ImageSpec {
                repository: format!("docker.io/library/{name}"),
                tag: "latest".to_string(),
            },
            ..Default::default()
        };
        spec.container.name = format!("svcadm-{name}");
        spec
    }

    fn config(services: Vec<ServiceSpec>) -> Configuration {
        Configuration {
            services,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(config(vec![service("postgresql")]).validate().is_ok());
    }

    #[test]
    fn test_port_boundaries() {
        assert!(check_port(PortNumber(0)).is_ok());
        assert!(check_port(PortNumber(65535)).is_ok());
        assert!(check_port(PortNumber(-1)).is_err());
        assert!(check_port(PortNumber(65536)).is_err());
    }

    #[test]
    fn test_restart_policy_boundaries() {
        for ok in ["always", "no", "unless-stopped", "on-failure:0", "on-failure:5"] {
            assert!(check_restart_policy(ok).is_ok(), "{ok}");
        }
        for bad in [
            "on-failure",
            "on-failure:",
            "On-Failure:1",
            "restart",
            "on-failure:\u{661}",
            "on-failure:99999999999999999999",
        ] {
            assert!(check_restart_policy(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_restart_without_count_is_config_invalid() {
        let mut svc = service("trivy");
        svc.container.restart = "on-failure".to_string();

        let err = config(vec![svc]).validate().unwrap_err();
        assert!(matches!(err, ConfigurationError::ValidationFailed { .. }));
        assert!(err.offending_fields()[0].contains("container.restart"));
    }

    #[test]
    fn test_username_boundaries() {
        assert!(check_username("abc").is_ok());
        assert!(check_username(&"a".repeat(20)).is_ok());
        assert!(check_username("ab").is_err());
        assert!(check_username(&"a".repeat(21)).is_err());
        assert!(check_username("bad name").is_err());
    }

    #[test]
    fn test_password_boundaries() {
        assert!(check_password(&"p".repeat(6)).is_ok());
        assert!(check_password(&"p".repeat(32)).is_ok());
        assert!(check_password(&"p".repeat(5)).is_err());
        assert!(check_password(&"p".repeat(33)).is_err());
        assert!(check_password(" hunter22").is_err());
        assert!(check_password("hunter22 ").is_err());
        assert!(check_password("hunter 22").is_ok());
    }

    #[test]
    fn test_unknown_service_and_backend_rejected() {
        let mut cfg = config(vec![service("redis")]);
        cfg.general.operator.name = "lxc".to_string();
        cfg.general.operator.network.driver = "overlay".to_string();

        let err = cfg.validate().unwrap_err();
        let fields = err.offending_fields().join("\n");
        assert!(fields.contains("general.operator.name"));
        assert!(fields.contains("general.operator.network.driver"));
        assert!(fields.contains("services[0].name"));
    }

    #[test]
    fn test_missing_prerequisite_rejected() {
        let err = config(vec![service("sonarqube")]).validate().unwrap_err();
        assert!(err
            .offending_fields()
            .iter()
            .any(|f| f.contains("'sonarqube' requires 'postgresql'")));

        assert!(config(vec![service("postgresql"), service("sonarqube")])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_disabled_prerequisite_rejected() {
        let mut postgres = service("postgresql");
        postgres.enabled = false;
        assert!(config(vec![postgres, service("gitlab")]).validate().is_err());
    }

    #[test]
    fn test_duplicate_container_names_rejected() {
        let mut vault = service("vault");
        vault.container.name = "shared".to_string();
        let mut minio = service("minio");
        minio.container.name = "shared".to_string();

        assert!(config(vec![vault, minio]).validate().is_err());
    }

    #[test]
    fn test_backup_rules() {
        let mut svc = service("minio");
        svc.backup.enabled = true;
        svc.backup.frequency = "hourly".to_string();
        svc.backup.retention = -1;

        let err = config(vec![svc]).validate().unwrap_err();
        assert_eq!(err.offending_fields().len(), 2);
    }

    #[test]
    fn test_persistence_volume_may_be_existing_host_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = service("minio");
        svc.persistence.enabled = true;
        svc.persistence
            .volumes
            .insert(dir.path().display().to_string(), "/data".to_string());
        assert!(config(vec![svc.clone()]).validate().is_ok());

        svc.persistence.volumes.clear();
        svc.persistence
            .volumes
            .insert("/does/not/exist".to_string(), "/data".to_string());
        assert!(config(vec![svc]).validate().is_err());
    }

    #[test]
    fn test_encryption_requires_key_and_salt() {
        let mut cfg = config(vec![]);
        cfg.general.access.encryption.enabled = true;

        let err = cfg.validate().unwrap_err();
        assert_eq!(err.offending_fields().len(), 2);
    }

    #[test]
    fn test_warnings() {
        let mut svc = service("minio");
        svc.backup.enabled = true;
        svc.proxy_frontend = true;

        let warnings = config(vec![svc]).warnings();
        assert_eq!(warnings.len(), 2);
    }
}
