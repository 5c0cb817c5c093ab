//! Lifecycle orchestration
//!
//! [`Orchestrator`] owns the process-wide state (configuration, users and
//! the engine handle) and drives setup, cleanup, backup and status across
//! the enabled services.

pub mod merge;
pub mod report;
pub mod scheduler;

pub use merge::{build_container_spec, merge_env, merge_ports, merge_volumes};
pub use report::{OperationReport, ServiceOutcome, StartReport};
pub use scheduler::{compute_batches, DependencyGraph};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Configuration, ServiceSpec, UserSet};
use crate::engine::{
    is_named_volume, resource_labels, BackendKind, ContainerEngine, NetworkDriver,
};
use crate::error::{Result, ServiceError};
use crate::services::{build_adapter, ServiceContext};

/// Root value of a svcadm run
pub struct Orchestrator {
    ctx: ServiceContext,
    extra_dependencies: Vec<(String, String)>,
}

impl Orchestrator {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            ctx,
            extra_dependencies: Vec::new(),
        }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.ctx.cancel.clone()
    }

    /// Add an edge on top of the built-in dependency graph.
    pub fn add_dependency(&mut self, dependent: &str, prerequisite: &str) -> &mut Self {
        self.extra_dependencies
            .push((dependent.to_string(), prerequisite.to_string()));
        self
    }

    fn dependency_graph(&self, enabled: &[ServiceSpec]) -> DependencyGraph {
        let mut graph = DependencyGraph::for_services(enabled);
        for (dependent, prerequisite) in &self.extra_dependencies {
            graph.add_dependency(dependent, prerequisite);
        }
        graph
    }

    /// Swap in a new configuration and user set.
    pub async fn reload_configuration(&self, config: Configuration, users: UserSet) {
        *self.ctx.config.write().await = config;
        *self.ctx.users.write().await = users;
        info!("Configuration reloaded");
    }

    /// Connect to the configured backend without touching the network.
    pub async fn connect_engine(&self) -> Result<BackendKind> {
        let backend = self
            .ctx
            .config
            .read()
            .await
            .general
            .operator
            .name
            .parse::<BackendKind>()?;
        self.ctx.engine.select_backend(backend).await?;
        debug!("Connected to {}", backend);
        Ok(backend)
    }

    /// Select the configured backend and make sure the network exists.
    /// Returns the network id.
    pub async fn initialize_engine(&self) -> Result<String> {
        let (network, driver, labels) = {
            let config = self.ctx.config.read().await;
            let operator = &config.general.operator;
            (
                operator.network.name.clone(),
                operator.network.driver.parse::<NetworkDriver>()?,
                resource_labels(&config.general.containers.labels, None),
            )
        };

        let backend = self.connect_engine().await?;
        let network_id = self
            .ctx
            .engine
            .ensure_network(&network, driver, &labels)
            .await?;
        info!("Using {} with network {} ({})", backend, network, network_id);
        Ok(network_id)
    }

    /// Start every enabled service, batch by batch.
    ///
    /// A failing service does not stop its siblings; services depending on
    /// it are skipped. A dependency cycle fails before anything starts.
    pub async fn start_services(&self) -> Result<StartReport> {
        let enabled = self.ctx.enabled_services().await;
        let names: Vec<String> = enabled.iter().map(|s| s.name.clone()).collect();
        let graph = self.dependency_graph(&enabled);
        let batches = compute_batches(&names, &graph)?;
        let labels = self.ctx.config.read().await.general.containers.labels.clone();

        info!(
            "Starting {} service(s) in {} batch(es)",
            names.len(),
            batches.len()
        );
        let mut report = StartReport::new(batches.clone());

        for (index, batch) in batches.iter().enumerate() {
            debug!("Batch {}: {}", index + 1, batch.join(", "));
            let mut tasks = JoinSet::new();

            for name in batch {
                if self.ctx.cancel.is_cancelled() {
                    report.record(
                        name.as_str(),
                        ServiceOutcome::Failed {
                            reason: "cancelled".to_string(),
                        },
                    );
                    continue;
                }

                let missing: Vec<String> = graph
                    .prerequisites(name)
                    .filter(|p| names.iter().any(|n| n == p) && !report.is_started(p))
                    .map(str::to_string)
                    .collect();
                if !missing.is_empty() {
                    let skipped = ServiceError::SkippedMissingPrereq {
                        service: name.clone(),
                        missing: missing.clone(),
                    };
                    warn!("{}", skipped);
                    report.record(name.as_str(), ServiceOutcome::Skipped { missing });
                    continue;
                }

                let Some(spec) = enabled.iter().find(|s| &s.name == name).cloned() else {
                    continue;
                };
                let ctx = self.ctx.clone();
                let labels = labels.clone();
                tasks.spawn(async move {
                    let name = spec.name.clone();
                    (name, start_service(spec, ctx, labels).await)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((name, Ok(container_id))) => {
                        info!("{} started", name);
                        report.record(name, ServiceOutcome::Started { container_id });
                    }
                    Ok((name, Err(e))) => {
                        error!("{} failed to start: {}", name, e);
                        report.record(
                            name,
                            ServiceOutcome::Failed {
                                reason: e.to_string(),
                            },
                        );
                    }
                    Err(e) => error!("Start task aborted: {}", e),
                }
            }

            for name in batch {
                if report.outcome(name).is_none() {
                    report.record(
                        name.as_str(),
                        ServiceOutcome::Failed {
                            reason: "start task aborted".to_string(),
                        },
                    );
                }
            }
        }

        Ok(report)
    }

    /// Remove containers, volumes and adapter state of every enabled
    /// service. Backup locations are never touched.
    pub async fn cleanup_services(&self) -> Result<OperationReport> {
        let config = self.ctx.config.read().await.clone();
        let protected: Vec<PathBuf> = config
            .services
            .iter()
            .filter_map(|s| s.backup.location_path().ok())
            .collect();

        let mut tasks = JoinSet::new();
        for spec in config.enabled_services().cloned() {
            let ctx = self.ctx.clone();
            let protected = protected.clone();
            tasks.spawn(async move {
                let name = spec.name.clone();
                (name, cleanup_service(spec, ctx, protected).await)
            });
        }

        let mut report = OperationReport::new("cleanup");
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, result)) => {
                    match &result {
                        Ok(()) => info!("{} cleaned up", name),
                        Err(e) => error!("Cleanup of {} failed: {}", name, e),
                    }
                    report.record(name, result);
                }
                Err(e) => error!("Cleanup task aborted: {}", e),
            }
        }
        Ok(report)
    }

    /// Back up every enabled service with backups enabled, one at a time.
    pub async fn backup_services(&self) -> Result<OperationReport> {
        let mut report = OperationReport::new("backup");

        for spec in self.ctx.enabled_services().await {
            if !spec.backup.enabled {
                debug!("Backups disabled for {}", spec.name);
                continue;
            }
            let name = spec.name.clone();
            let result = backup_service(spec, self.ctx.clone()).await;
            match &result {
                Ok(()) => info!("{} backed up", name),
                Err(e) => error!("Backup of {} failed: {}", name, e),
            }
            report.record(name, result);
        }
        Ok(report)
    }

    /// `(service, state)` for every enabled service, in declaration order.
    /// A missing container reports `absent`.
    pub async fn fetch_services_status(&self) -> Result<Vec<(String, String)>> {
        let enabled = self.ctx.enabled_services().await;

        let mut tasks = JoinSet::new();
        for spec in &enabled {
            let engine = self.ctx.engine.clone();
            let name = spec.name.clone();
            let container = spec.container.name.clone();
            tasks.spawn(async move {
                let state = match engine.status(&container).await {
                    Ok(state) => state,
                    Err(e) if e.is_not_found() => "absent".to_string(),
                    Err(e) => format!("unknown ({e})"),
                };
                (name, state)
            });
        }

        let mut states = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, state)) => {
                    states.insert(name, state);
                }
                Err(e) => error!("Status task aborted: {}", e),
            }
        }

        Ok(enabled
            .into_iter()
            .map(|spec| {
                let state = states
                    .remove(&spec.name)
                    .unwrap_or_else(|| "unknown".to_string());
                (spec.name, state)
            })
            .collect())
    }
}

/// Pre-init, create and start, post-init.
async fn start_service(
    spec: ServiceSpec,
    ctx: ServiceContext,
    labels: BTreeMap<String, String>,
) -> Result<String> {
    let adapter = build_adapter(spec.clone(), ctx.clone())?;

    info!("{}: pre-init", adapter.adapter_tag());
    let artifacts = adapter.pre_init().await?;

    let container = build_container_spec(&spec, artifacts, &labels);
    let container_id = ctx.engine.create_and_start(&container).await?;

    info!("{}: post-init", adapter.adapter_tag());
    adapter.post_init().await?;
    Ok(container_id)
}

async fn cleanup_service(
    spec: ServiceSpec,
    ctx: ServiceContext,
    protected: Vec<PathBuf>,
) -> Result<()> {
    let adapter = build_adapter(spec.clone(), ctx.clone())?;
    let targets = adapter.cleanup();
    let engine = ctx.engine.as_ref();
    let container = spec.container_name();

    if let Err(e) = engine.stop(container).await {
        debug!("Stopping {} failed, ignored: {}", container, e);
    }
    let mut failures = Vec::new();
    match engine.remove(container, true).await {
        Ok(()) => info!("Removed container {}", container),
        Err(e) if e.is_not_found() => debug!("Container {} already gone", container),
        Err(e) => {
            error!("Removing container {} failed: {}", container, e);
            failures.push(format!("container {container}: {e}"));
        }
    }

    let declared = spec.declared_volumes();
    let volumes = declared
        .keys()
        .filter(|source| is_named_volume(source))
        .cloned()
        .chain(targets.volumes);
    for volume in volumes {
        match remove_volume(engine, &volume).await {
            Ok(true) => info!("Removed volume {}", volume),
            Ok(false) => debug!("Volume {} already gone", volume),
            Err(e) => {
                error!("Removing volume {} failed: {}", volume, e);
                failures.push(format!("volume {volume}: {e}"));
            }
        }
    }

    for path in targets.host_paths {
        if is_protected(&path, &protected) {
            warn!("Not removing {}: it holds backups", path.display());
            continue;
        }
        if let Err(e) = remove_host_path(&path).await {
            error!("Removing {} failed: {}", path.display(), e);
            failures.push(format!("{}: {e}", path.display()));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::CleanupIncomplete {
            service: spec.name.clone(),
            failures,
        })
    }
}

/// Remove `volume` if present. Returns whether anything was removed.
async fn remove_volume(engine: &dyn ContainerEngine, volume: &str) -> Result<bool> {
    if !engine.volume_exists(volume).await? {
        return Ok(false);
    }
    engine.remove_volume(volume).await?;
    Ok(true)
}

/// Whether removing `path` would touch a backup location
fn is_protected(path: &Path, protected: &[PathBuf]) -> bool {
    protected.iter().any(|backup| backup.starts_with(path))
}

async fn remove_host_path(path: &Path) -> Result<()> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    info!("Removed {}", path.display());
    Ok(())
}

async fn backup_service(spec: ServiceSpec, ctx: ServiceContext) -> Result<()> {
    let dest = spec.backup.location_path()?;
    tokio::fs::create_dir_all(&dest).await?;
    let adapter = build_adapter(spec, ctx)?;
    adapter.backup(&dest).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_locations_are_protected() {
        let protected = vec![PathBuf::from("/home/dev/.svcadm/backups/vault")];

        assert!(is_protected(Path::new("/home/dev/.svcadm"), &protected));
        assert!(is_protected(
            Path::new("/home/dev/.svcadm/backups/vault"),
            &protected
        ));
        assert!(!is_protected(Path::new("/home/dev/.svcadm/vaultadm"), &protected));
    }
}
