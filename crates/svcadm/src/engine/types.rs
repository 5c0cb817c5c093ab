//! Engine data types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Value of the `managed_by` label on every resource svcadm creates
pub const MANAGED_BY: &str = "svcadm";

pub const LABEL_MANAGED_BY: &str = "managed_by";
pub const LABEL_VERSION: &str = "svcadm_version";
pub const LABEL_SERVICE: &str = "service";

/// A host port published for a container port (tcp)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

/// Everything needed to create and start one container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name, unique across the managed set
    pub name: String,

    /// Image reference, `repository:tag`
    pub image: String,

    /// Environment as `K=V` entries
    pub env: Vec<String>,

    /// Command override, `None` keeps the image default
    pub cmd: Option<Vec<String>>,

    pub labels: HashMap<String, String>,

    /// Restart policy string (`always`, `no`, `unless-stopped`, `on-failure:N`)
    pub restart: String,

    /// Volume binds as `source:target[:options]`
    pub binds: Vec<String>,

    pub ports: Vec<PortMapping>,

    pub cap_add: Vec<String>,
}

impl ContainerSpec {
    /// Sources of `binds` that name engine volumes rather than host paths.
    pub fn named_volumes(&self) -> Vec<&str> {
        self.binds
            .iter()
            .filter_map(|bind| bind.split(':').next())
            .filter(|source| is_named_volume(source))
            .collect()
    }

    /// Value of `key` in `env`, if set.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

/// Whether a bind source is an engine volume name rather than a host path.
pub fn is_named_volume(source: &str) -> bool {
    !source.is_empty() && !source.starts_with(['/', '.', '~'])
}

/// Build an argv from string-like parts.
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}

/// Labels for a resource owned by `service`, layered over the user's
/// configured labels. The mandatory labels always win.
pub fn resource_labels(
    configured: &std::collections::BTreeMap<String, String>,
    service: Option<&str>,
) -> HashMap<String, String> {
    let mut labels: HashMap<String, String> = configured
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
    labels.insert(LABEL_VERSION.to_string(), crate::VERSION.to_string());
    if let Some(service) = service {
        labels.insert(LABEL_SERVICE.to_string(), service.to_string());
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_named_volumes_skip_host_paths() {
        let spec = ContainerSpec {
            binds: vec![
                "pgdata:/var/lib/postgresql/data".to_string(),
                "/home/dev/.svcadm/nginxadm/nginx.conf:/etc/nginx/conf.d/default.conf:Z"
                    .to_string(),
                "./certs:/etc/ssl/certs".to_string(),
            ],
            ..Default::default()
        };

        assert_eq!(spec.named_volumes(), vec!["pgdata"]);
    }

    #[test]
    fn test_env_value_splits_on_first_equals() {
        let spec = ContainerSpec {
            env: vec![
                "A=1".to_string(),
                "DSN=postgres://u:p@db:5432/x?sslmode=disable".to_string(),
            ],
            ..Default::default()
        };

        assert_eq!(
            spec.env_value("DSN"),
            Some("postgres://u:p@db:5432/x?sslmode=disable")
        );
        assert_eq!(spec.env_value("B"), None);
    }

    #[test]
    fn test_mandatory_labels_override_configured() {
        let mut configured = BTreeMap::new();
        configured.insert("team".to_string(), "platform".to_string());
        configured.insert(LABEL_MANAGED_BY.to_string(), "someone-else".to_string());

        let labels = resource_labels(&configured, Some("vault"));
        assert_eq!(labels["team"], "platform");
        assert_eq!(labels[LABEL_MANAGED_BY], MANAGED_BY);
        assert_eq!(labels[LABEL_SERVICE], "vault");
        assert_eq!(labels[LABEL_VERSION], crate::VERSION);
    }
}
