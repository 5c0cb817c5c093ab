//! Combining a service's declared settings with what its adapter contributes

use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::config::{PortNumber, ServiceSpec};
use crate::engine::{resource_labels, ContainerSpec, PortMapping};
use crate::services::RuntimeArtifacts;

/// Declared env overlaid with the adapter's; the adapter wins on collisions.
pub fn merge_env(
    declared: &BTreeMap<String, String>,
    adapter: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = declared.clone();
    merged.extend(adapter.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Declared persistence volumes plus the adapter's extra volumes.
pub fn merge_volumes(
    declared: BTreeMap<String, String>,
    adapter: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = declared;
    for (source, target) in adapter {
        merged.entry(source.clone()).or_insert_with(|| target.clone());
    }
    merged
}

/// Declared ports plus the adapter's. A container port the user already
/// publishes keeps the user's host port.
pub fn merge_ports(
    declared: &BTreeMap<PortNumber, PortNumber>,
    adapter: &BTreeMap<u16, u16>,
) -> Vec<PortMapping> {
    let mut mappings: Vec<PortMapping> = declared
        .iter()
        .filter_map(|(host, container)| {
            Some(PortMapping {
                host: host.as_u16()?,
                container: container.as_u16()?,
            })
        })
        .collect();

    let published: BTreeSet<u16> = mappings.iter().map(|m| m.container).collect();
    let used_hosts: BTreeSet<u16> = mappings.iter().map(|m| m.host).collect();
    for (&host, &container) in adapter {
        if published.contains(&container) {
            continue;
        }
        if used_hosts.contains(&host) {
            warn!(
                "Host port {} already published, not mapping it to {}",
                host, container
            );
            continue;
        }
        mappings.push(PortMapping { host, container });
    }

    mappings.sort();
    mappings
}

/// Container definition for `spec` after its adapter's pre-init.
pub fn build_container_spec(
    spec: &ServiceSpec,
    artifacts: RuntimeArtifacts,
    configured_labels: &BTreeMap<String, String>,
) -> ContainerSpec {
    let env = merge_env(&spec.container.env, &artifacts.env);
    let volumes = merge_volumes(spec.declared_volumes(), &artifacts.volumes);

    ContainerSpec {
        name: spec.container.name.clone(),
        image: spec.image.to_string(),
        env: env.into_iter().map(|(k, v)| format!("{k}={v}")).collect(),
        cmd: artifacts.command,
        labels: resource_labels(configured_labels, Some(&spec.name)),
        restart: spec.container.restart.clone(),
        binds: volumes
            .into_iter()
            .map(|(source, target)| format!("{source}:{target}"))
            .collect(),
        ports: merge_ports(&spec.container.ports, &artifacts.ports),
        cap_add: artifacts.cap_add,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{LABEL_MANAGED_BY, LABEL_SERVICE, MANAGED_BY};

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_adapter_env_wins() {
        let merged = merge_env(
            &map(&[("K", "declared"), ("ONLY_DECLARED", "1")]),
            &map(&[("K", "adapter")]),
        );
        assert_eq!(merged["K"], "adapter");
        assert_eq!(merged["ONLY_DECLARED"], "1");
    }

    #[test]
    fn test_user_ports_win_for_same_container_port() {
        let declared = BTreeMap::from([(PortNumber(15432), PortNumber(5432))]);
        let adapter = BTreeMap::from([(5432, 5432), (8200, 8200)]);

        assert_eq!(
            merge_ports(&declared, &adapter),
            vec![
                PortMapping { host: 8200, container: 8200 },
                PortMapping { host: 15432, container: 5432 },
            ]
        );
    }

    #[test]
    fn test_container_spec() {
        let mut spec = ServiceSpec {
            name: "postgresql".to_string(),
            ..Default::default()
        };
        spec.container.name = "svcadm-postgresql".to_string();
        spec.container.env = map(&[("POSTGRES_PASSWORD", "mine"), ("TZ", "UTC")]);
        spec.image.repository = "docker.io/library/postgres".to_string();
        spec.image.tag = "16".to_string();
        spec.persistence.enabled = true;
        spec.persistence.volumes = map(&[("pgdata", "/var/lib/postgresql/data")]);

        let artifacts = RuntimeArtifacts {
            env: map(&[("POSTGRES_PASSWORD", "generated")]),
            cap_add: vec!["IPC_LOCK".to_string()],
            ..Default::default()
        };
        let container = build_container_spec(&spec, artifacts, &map(&[("team", "dev")]));

        assert_eq!(container.image, "docker.io/library/postgres:16");
        assert_eq!(container.env_value("POSTGRES_PASSWORD"), Some("generated"));
        assert_eq!(container.env_value("TZ"), Some("UTC"));
        assert_eq!(container.binds, vec!["pgdata:/var/lib/postgresql/data"]);
        assert_eq!(container.labels[LABEL_MANAGED_BY], MANAGED_BY);
        assert_eq!(container.labels[LABEL_SERVICE], "postgresql");
        assert_eq!(container.labels["team"], "dev");
        assert_eq!(container.cap_add, vec!["IPC_LOCK"]);
    }
}
