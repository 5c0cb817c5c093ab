//! Container configuration builder

use super::types::ContainerSpec;
use super::EngineError;
use bollard::{
    container::{Config, NetworkingConfig},
    models::{EndpointSettings, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum},
};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartMode {
    Always,
    No,
    UnlessStopped,
    OnFailure,
}

impl fmt::Display for RestartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Always => "always",
            Self::No => "no",
            Self::UnlessStopped => "unless-stopped",
            Self::OnFailure => "on-failure",
        })
    }
}

/// Parsed restart policy: a mode plus the retry cap used by `on-failure`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicySpec {
    pub mode: RestartMode,
    pub max_retries: i64,
}

impl RestartPolicySpec {
    /// Parse `always`, `no`, `unless-stopped` or `on-failure:N`.
    pub fn parse(policy: &str) -> Result<Self, EngineError> {
        let invalid = || EngineError::InvalidRestartPolicy(policy.to_string());

        if let Some(count) = policy.strip_prefix("on-failure:") {
            if count.is_empty() || !count.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            let max_retries = count.parse::<i64>().map_err(|_| invalid())?;
            return Ok(Self {
                mode: RestartMode::OnFailure,
                max_retries,
            });
        }

        let mode = match policy {
            "always" => RestartMode::Always,
            "no" => RestartMode::No,
            "unless-stopped" => RestartMode::UnlessStopped,
            _ => return Err(invalid()),
        };
        Ok(Self {
            mode,
            max_retries: 0,
        })
    }

    fn to_bollard(self) -> RestartPolicy {
        let name = match self.mode {
            RestartMode::Always => RestartPolicyNameEnum::ALWAYS,
            RestartMode::No => RestartPolicyNameEnum::NO,
            RestartMode::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
            RestartMode::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
        };
        RestartPolicy {
            name: Some(name),
            maximum_retry_count: Some(self.max_retries),
        }
    }
}

/// Translate a [`ContainerSpec`] into the engine's create request.
pub fn build(spec: &ContainerSpec, network: Option<&str>) -> Result<Config<String>, EngineError> {
    let restart = RestartPolicySpec::parse(&spec.restart)?;

    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
    for mapping in &spec.ports {
        let key = format!("{}/tcp", mapping.container);
        port_bindings
            .entry(key.clone())
            .or_insert_with(|| Some(Vec::new()))
            .get_or_insert_with(Vec::new)
            .push(PortBinding {
                host_ip: None,
                host_port: Some(mapping.host.to_string()),
            });
        exposed_ports.insert(key, HashMap::new());
    }

    let host_config = HostConfig {
        binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        restart_policy: Some(restart.to_bollard()),
        cap_add: (!spec.cap_add.is_empty()).then(|| spec.cap_add.clone()),
        network_mode: network.map(str::to_string),
        ..Default::default()
    };

    let networking_config = network.map(|network| NetworkingConfig {
        endpoints_config: HashMap::from([(
            network.to_string(),
            EndpointSettings {
                aliases: Some(vec![spec.name.clone()]),
                ..Default::default()
            },
        )]),
    });

    Ok(Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.clone()),
        cmd: spec.cmd.clone(),
        labels: Some(spec.labels.clone()),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        networking_config,
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::PortMapping;

    #[test]
    fn test_restart_policy_modes() {
        let always = RestartPolicySpec::parse("always").unwrap();
        assert_eq!(always.mode, RestartMode::Always);
        assert_eq!(always.max_retries, 0);

        let on_failure = RestartPolicySpec::parse("on-failure:5").unwrap();
        assert_eq!(on_failure.mode, RestartMode::OnFailure);
        assert_eq!(on_failure.max_retries, 5);

        let unless = RestartPolicySpec::parse("unless-stopped").unwrap();
        assert_eq!(unless.mode, RestartMode::UnlessStopped);
        assert_eq!(unless.max_retries, 0);

        assert_eq!(RestartPolicySpec::parse("on-failure:0").unwrap().max_retries, 0);
    }

    #[test]
    fn test_restart_policy_rejects_malformed() {
        for policy in ["on-failure", "on-failure:", "on-failure:-1", "sometimes", ""] {
            assert!(
                RestartPolicySpec::parse(policy).is_err(),
                "{policy} should be rejected"
            );
        }
    }

    #[test]
    fn test_build_container_config() {
        let spec = ContainerSpec {
            name: "svcadm-postgres".to_string(),
            image: "postgres:16".to_string(),
            env: vec!["POSTGRES_PASSWORD=secret".to_string()],
            restart: "on-failure:3".to_string(),
            binds: vec!["pgdata:/var/lib/postgresql/data".to_string()],
            ports: vec![PortMapping {
                host: 15432,
                container: 5432,
            }],
            cap_add: vec!["IPC_LOCK".to_string()],
            ..Default::default()
        };

        let config = build(&spec, Some("svcadm")).unwrap();
        let host_config = config.host_config.unwrap();

        let bindings = host_config.port_bindings.unwrap();
        let binding = bindings["5432/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("15432"));

        let restart = host_config.restart_policy.unwrap();
        assert_eq!(restart.name, Some(RestartPolicyNameEnum::ON_FAILURE));
        assert_eq!(restart.maximum_retry_count, Some(3));

        assert_eq!(host_config.cap_add, Some(vec!["IPC_LOCK".to_string()]));
        assert_eq!(host_config.network_mode.as_deref(), Some("svcadm"));
        assert!(config
            .networking_config
            .unwrap()
            .endpoints_config
            .contains_key("svcadm"));
    }

    #[test]
    fn test_build_rejects_bad_restart() {
        let spec = ContainerSpec {
            restart: "on-failure:".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            build(&spec, None),
            Err(EngineError::InvalidRestartPolicy(_))
        ));
    }
}
