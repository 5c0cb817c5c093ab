//! Service adapters
//!
//! Every supported service plugs into the lifecycle through
//! [`ServiceAdapter`]. Adapters are created in one place, [`build_adapter`],
//! and share a [`ServiceContext`] carrying the engine and the active
//! configuration and users.

pub mod clamav;
pub mod gitlab;
pub mod mattermost;
pub mod minio;
pub mod nginx;
pub mod postgresql;
pub mod provisioning;
pub mod sonarqube;
pub mod trivy;
pub mod vault;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use common::secrets::random_password;

use crate::config::{Configuration, ServiceSpec, User, UserSet};
use crate::engine::{ContainerEngine, EngineError};
use crate::error::{Result, ServiceError};
use crate::paths::SvcadmPaths;

pub use clamav::ClamavAdapter;
pub use gitlab::GitlabAdapter;
pub use mattermost::MattermostAdapter;
pub use minio::MinioAdapter;
pub use nginx::NginxAdapter;
pub use postgresql::PostgresAdapter;
pub use sonarqube::SonarqubeAdapter;
pub use trivy::TrivyAdapter;
pub use vault::VaultAdapter;

/// Length of every generated password and token
pub const SECRET_LENGTH: usize = 32;

/// The closed set of services svcadm knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceKind {
    Nginx,
    Gitlab,
    Mattermost,
    Sonarqube,
    Postgresql,
    Clamav,
    Trivy,
    Minio,
    Vault,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 9] = [
        Self::Nginx,
        Self::Gitlab,
        Self::Mattermost,
        Self::Sonarqube,
        Self::Postgresql,
        Self::Clamav,
        Self::Trivy,
        Self::Minio,
        Self::Vault,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nginx => "nginx",
            Self::Gitlab => "gitlab",
            Self::Mattermost => "mattermost",
            Self::Sonarqube => "sonarqube",
            Self::Postgresql => "postgresql",
            Self::Clamav => "clamav",
            Self::Trivy => "trivy",
            Self::Minio => "minio",
            Self::Vault => "vault",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = ServiceError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ServiceError::UnknownService(s.to_string()))
    }
}

/// What an adapter contributes to its container before it is created
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeArtifacts {
    /// Merged over the declared env; these values win
    pub env: BTreeMap<String, String>,

    /// Extra volumes (name or host path to mount path)
    pub volumes: BTreeMap<String, String>,

    /// Extra published ports, host to container
    pub ports: BTreeMap<u16, u16>,

    pub cap_add: Vec<String>,

    /// Command override
    pub command: Option<Vec<String>>,
}

/// Resources an adapter owns beyond the declared persistence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupTargets {
    pub volumes: Vec<String>,
    pub host_paths: Vec<PathBuf>,
}

/// Shared handles every adapter works with
#[derive(Clone)]
pub struct ServiceContext {
    pub engine: Arc<dyn ContainerEngine>,
    pub config: Arc<RwLock<Configuration>>,
    pub users: Arc<RwLock<UserSet>>,
    pub paths: SvcadmPaths,
    /// Public hostname used in proxy URLs
    pub hostname: String,
    pub cancel: CancellationToken,
}

impl ServiceContext {
    /// Snapshot of an enabled service's spec
    pub async fn enabled_service(&self, name: &str) -> Option<ServiceSpec> {
        self.config
            .read()
            .await
            .service(name)
            .filter(|spec| spec.enabled)
            .cloned()
    }

    /// Snapshot of every enabled service's spec
    pub async fn enabled_services(&self) -> Vec<ServiceSpec> {
        self.config
            .read()
            .await
            .enabled_services()
            .cloned()
            .collect()
    }

    pub async fn users(&self) -> UserSet {
        self.users.read().await.clone()
    }

    /// Adapter for the running postgres instance, for services that keep
    /// their data there.
    pub async fn postgres(&self, requester: &str) -> Result<PostgresAdapter> {
        let spec = self
            .enabled_service(ServiceKind::Postgresql.as_str())
            .await
            .ok_or_else(|| {
                ServiceError::provisioning(requester, "postgresql is not enabled")
            })?;
        Ok(PostgresAdapter::new(spec, self.clone()))
    }

    /// Secret `key` already set on `container`, or a fresh random one.
    ///
    /// Re-running setup resumes existing containers with their original
    /// environment, so their secrets have to be reused.
    pub async fn existing_or_random_secret(&self, container: &str, key: &str) -> Result<String> {
        match self.engine.container_env(container, key).await {
            Ok(value) if !value.is_empty() => {
                debug!("Reusing {} from container {}", key, container);
                Ok(value)
            }
            Ok(_) => Ok(random_password(SECRET_LENGTH)),
            Err(EngineError::EnvNotFound { .. }) => Ok(random_password(SECRET_LENGTH)),
            Err(e) if e.is_not_found() => Ok(random_password(SECRET_LENGTH)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Per-service lifecycle capability
#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    /// Service name, as configured
    fn name(&self) -> &str {
        &self.spec().name
    }

    /// Stable tag used in logs and for adapter-owned state
    fn adapter_tag(&self) -> &'static str;

    fn spec(&self) -> &ServiceSpec;

    /// Prepare the container. May create resources in prerequisite services.
    async fn pre_init(&self) -> Result<RuntimeArtifacts>;

    /// Runs once the container is running: waits for readiness, then
    /// provisions users and persists secrets.
    async fn post_init(&self) -> Result<()> {
        self.wait_for().await?;
        provisioning::provision_users(self, &self.context().users().await).await;
        Ok(())
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        debug!(
            "{} has no user management, skipping {}",
            self.name(),
            user.username
        );
        Ok(())
    }

    async fn create_admin_user(&self, user: &User) -> Result<()> {
        self.create_user(user).await
    }

    /// Write one timestamped archive into `dest`
    async fn backup(&self, dest: &Path) -> Result<()> {
        debug!(
            "{} keeps no state, nothing to back up into {}",
            self.name(),
            dest.display()
        );
        Ok(())
    }

    /// Application-level readiness
    async fn wait_for(&self) -> Result<()>;

    /// Resources to remove in addition to the declared persistence
    fn cleanup(&self) -> CleanupTargets {
        CleanupTargets::default()
    }

    /// Reverse-proxy location block, empty when not proxied
    fn proxy_fragment(&self) -> String {
        String::new()
    }

    fn context(&self) -> &ServiceContext;
}

/// Map a service spec onto its adapter.
pub fn build_adapter(spec: ServiceSpec, ctx: ServiceContext) -> Result<Arc<dyn ServiceAdapter>> {
    let adapter: Arc<dyn ServiceAdapter> = match spec.name.parse::<ServiceKind>()? {
        ServiceKind::Postgresql => Arc::new(PostgresAdapter::new(spec, ctx)),
        ServiceKind::Gitlab => Arc::new(GitlabAdapter::new(spec, ctx)),
        ServiceKind::Mattermost => Arc::new(MattermostAdapter::new(spec, ctx)),
        ServiceKind::Sonarqube => Arc::new(SonarqubeAdapter::new(spec, ctx)),
        ServiceKind::Minio => Arc::new(MinioAdapter::new(spec, ctx)),
        ServiceKind::Vault => Arc::new(VaultAdapter::new(spec, ctx)),
        ServiceKind::Trivy => Arc::new(TrivyAdapter::new(spec, ctx)),
        ServiceKind::Nginx => Arc::new(NginxAdapter::new(spec, ctx)),
        ServiceKind::Clamav => Arc::new(ClamavAdapter::new(spec, ctx)),
    };
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_kind_round_trip() {
        for kind in ServiceKind::ALL {
            assert_eq!(kind.as_str().parse::<ServiceKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_service() {
        assert!(matches!(
            "redis".parse::<ServiceKind>(),
            Err(ServiceError::UnknownService(name)) if name == "redis"
        ));
    }
}
