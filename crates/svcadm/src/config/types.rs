//! Configuration schema

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use common::config::loader;
use common::error::ConfigurationError;

/// Root of `svcadm.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub general: GeneralConfig,
    pub services: Vec<ServiceSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub operator: OperatorConfig,
    pub access: AccessConfig,
    pub containers: ContainersConfig,
}

/// Container engine selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Backend kind, `docker` or `podman`
    pub name: String,

    pub network: NetworkSettings,

    /// API socket to use instead of the backend default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket: Option<PathBuf>,

    /// Public hostname used in proxy URLs, defaults to the machine hostname
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            name: "docker".to_string(),
            network: NetworkSettings::default(),
            socket: None,
            hostname: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub name: String,
    pub driver: String,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            name: "svcadm".to_string(),
            driver: "bridge".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Path to the users file
    pub logins: String,

    pub encryption: EncryptionConfig,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            logins: "~/.svcadm/logins.yaml".to_string(),
            encryption: EncryptionConfig::default(),
        }
    }
}

impl AccessConfig {
    pub fn logins_path(&self) -> Result<PathBuf, ConfigurationError> {
        if self.logins.trim().is_empty() {
            return Err(ConfigurationError::MissingRequired {
                key: "general.access.logins".to_string(),
            });
        }
        loader::expand_path(&self.logins)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub enabled: bool,
    pub key: String,
    pub salt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainersConfig {
    /// Extra labels stamped on every container, volume and network
    pub labels: BTreeMap<String, String>,
}

/// One managed service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSpec {
    pub name: String,
    pub enabled: bool,
    pub image: ImageSpec,
    pub container: ContainerSettings,
    pub persistence: PersistenceSpec,
    pub backup: BackupSpec,
    #[serde(rename = "proxyFrontend", alias = "proxy_frontend")]
    pub proxy_frontend: bool,
}

impl Default for ServiceSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            image: ImageSpec::default(),
            container: ContainerSettings::default(),
            persistence: PersistenceSpec::default(),
            backup: BackupSpec::default(),
            proxy_frontend: false,
        }
    }
}

impl ServiceSpec {
    pub fn container_name(&self) -> &str {
        &self.container.name
    }

    /// Persistence volumes, empty when persistence is disabled
    pub fn declared_volumes(&self) -> BTreeMap<String, String> {
        if self.persistence.enabled {
            self.persistence.volumes.clone()
        } else {
            BTreeMap::new()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSpec {
    pub repository: String,
    pub tag: String,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            repository: String::new(),
            tag: "latest".to_string(),
        }
    }
}

impl fmt::Display for ImageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    pub name: String,

    /// Host port to container port
    pub ports: BTreeMap<PortNumber, PortNumber>,

    pub restart: String,

    pub env: BTreeMap<String, String>,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            ports: BTreeMap::new(),
            restart: "unless-stopped".to_string(),
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSpec {
    pub enabled: bool,

    /// Volume name (or host path) to mount path
    pub volumes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSpec {
    pub enabled: bool,
    pub frequency: String,
    pub retention: i64,
    pub location: String,
}

impl Default for BackupSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency: "daily".to_string(),
            retention: 7,
            location: "~/.svcadm/backups".to_string(),
        }
    }
}

impl BackupSpec {
    pub fn location_path(&self) -> Result<PathBuf, ConfigurationError> {
        if self.location.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "backup.location",
                &self.location,
                "must name a directory",
            ));
        }
        loader::expand_path(&self.location)
    }
}

/// A port number as written in the configuration.
///
/// Kept wide so out-of-range values survive parsing and are reported by
/// validation instead of failing deserialization. Accepts integers and
/// numeric strings because map keys arrive as strings from some sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortNumber(pub i64);

impl PortNumber {
    pub fn as_u16(self) -> Option<u16> {
        u16::try_from(self.0).ok()
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for PortNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for PortNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PortVisitor;

        impl<'de> Visitor<'de> for PortVisitor {
            type Value = PortNumber;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a port number")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<PortNumber, E> {
                Ok(PortNumber(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<PortNumber, E> {
                i64::try_from(v)
                    .map(PortNumber)
                    .map_err(|_| E::custom(format!("port {v} out of range")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<PortNumber, E> {
                v.trim()
                    .parse::<i64>()
                    .map(PortNumber)
                    .map_err(|_| E::custom(format!("'{v}' is not a port number")))
            }
        }

        deserializer.deserialize_any(PortVisitor)
    }
}

impl Configuration {
    /// Load and validate the configuration at `path`
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigurationError> {
        use common::config::ConfigValidation;

        let config: Self = loader::load_from_file(path)?;
        config.validate()?;
        for warning in config.warnings() {
            tracing::warn!("{}", warning);
        }
        Ok(config)
    }

    /// Enabled services in declaration order
    pub fn enabled_services(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.services.iter().filter(|service| service.enabled)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|service| service.name == name)
    }
}

/// Starting configuration written by `svcadm config generate`
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# svcadm configuration
general:
  operator:
    # docker or podman
    name: docker
    network:
      name: svcadm
      # bridge, host or none
      driver: bridge
  access:
    logins: ~/.svcadm/logins.yaml
    encryption:
      enabled: false
      key: ""
      salt: ""
  containers:
    labels: {}

services:
  - name: postgresql
    enabled: true
    image:
      repository: docker.io/library/postgres
      tag: "16"
    container:
      name: svcadm-postgresql
      restart: unless-stopped
      ports: {}
      env: {}
    persistence:
      enabled: true
      volumes:
        svcadm-pgdata: /var/lib/postgresql/data
    backup:
      enabled: true
      frequency: daily
      retention: 7
      location: ~/.svcadm/backups/postgresql
    proxyFrontend: false

  - name: sonarqube
    enabled: false
    image:
      repository: docker.io/library/sonarqube
      tag: community
    container:
      name: svcadm-sonarqube
      restart: unless-stopped
      ports: {}
      env: {}
    persistence:
      enabled: true
      volumes:
        svcadm-sonarqube-data: /opt/sonarqube/data
        svcadm-sonarqube-extensions: /opt/sonarqube/extensions
    backup:
      enabled: false
      frequency: weekly
      retention: 4
      location: ~/.svcadm/backups/sonarqube
    proxyFrontend: true

  - name: nginx
    enabled: false
    image:
      repository: docker.io/library/nginx
      tag: stable
    container:
      name: svcadm-nginx
      restart: unless-stopped
      ports:
        80: 80
        443: 443
      env: {}
    persistence:
      enabled: false
      volumes: {}
    backup:
      enabled: false
    proxyFrontend: false
"#;
