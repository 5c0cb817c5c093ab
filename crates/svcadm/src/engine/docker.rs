//! Bollard-backed container engine

use super::backend::{resolve_endpoint, BackendKind, Endpoint, NetworkDriver};
use super::types::ContainerSpec;
use super::{archive, config_builder, is_not_found, ContainerEngine, EngineError, EngineResult};
use crate::config::validation::is_valid_name;
use async_trait::async_trait;
use bollard::{
    container::{
        CreateContainerOptions, DownloadFromContainerOptions, InspectContainerOptions,
        LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
        StopContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    network::{CreateNetworkOptions, InspectNetworkOptions, ListNetworksOptions},
    volume::{CreateVolumeOptions, RemoveVolumeOptions},
    Docker, API_DEFAULT_VERSION,
};
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Seconds a request may take before the client gives up
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Seconds a container gets to stop before it is killed
const STOP_TIMEOUT_SECS: i64 = 10;

/// How the engine reaches its backend
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Socket to use instead of the backend default
    pub socket_override: Option<PathBuf>,
    /// `DOCKER_HOST` as seen at startup
    pub docker_host: Option<String>,
}

impl EngineOptions {
    pub fn from_env(socket_override: Option<PathBuf>) -> Self {
        Self {
            socket_override,
            docker_host: std::env::var("DOCKER_HOST").ok(),
        }
    }
}

#[derive(Default)]
struct EngineState {
    backend: Option<BackendKind>,
    client: Option<Docker>,
    network: Option<String>,
}

/// The process-wide engine client together with the selected backend and
/// network.
pub struct DockerEngine {
    options: EngineOptions,
    state: RwLock<EngineState>,
}

impl DockerEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            state: RwLock::new(EngineState::default()),
        }
    }

    async fn client(&self) -> EngineResult<Docker> {
        self.state
            .read()
            .await
            .client
            .clone()
            .ok_or(EngineError::NotInitialized)
    }

    async fn connect(endpoint: &Endpoint) -> EngineResult<Docker> {
        let unavailable = |e: bollard::errors::Error| EngineError::EngineUnavailable {
            message: format!("{endpoint}: {e}"),
        };

        let docker = match endpoint {
            Endpoint::Unix(path) => Docker::connect_with_unix(
                &path.to_string_lossy(),
                CLIENT_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            ),
            Endpoint::DockerHost(host) if host.starts_with("unix://") => {
                Docker::connect_with_unix(host, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Endpoint::DockerHost(host) => {
                Docker::connect_with_http(host, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
        }
        .map_err(unavailable)?;

        let docker = docker.negotiate_version().await.map_err(unavailable)?;
        let version = docker.version().await.map_err(unavailable)?;
        info!(
            "Connected to container engine {} (API {})",
            version.version.unwrap_or_default(),
            version.api_version.unwrap_or_default()
        );
        Ok(docker)
    }

    async fn ensure_volume(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> EngineResult<()> {
        if !self.volume_exists(name).await? {
            self.create_volume(name, labels).await?;
        }
        Ok(())
    }
}

fn map_not_found(subject: &str) -> impl Fn(bollard::errors::Error) -> EngineError + '_ {
    move |e| {
        if is_not_found(&e) {
            EngineError::NotFound(subject.to_string())
        } else {
            EngineError::Api(e)
        }
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn select_backend(&self, kind: BackendKind) -> EngineResult<()> {
        if let Some(current) = self.state.read().await.backend {
            return if current == kind {
                Ok(())
            } else {
                Err(EngineError::BackendAlreadySelected {
                    current,
                    requested: kind,
                })
            };
        }

        let endpoint = resolve_endpoint(
            kind,
            self.options.socket_override.as_deref(),
            self.options.docker_host.as_deref(),
        )?;
        info!("Selecting {} backend at {}", kind, endpoint);
        let docker = Self::connect(&endpoint).await?;

        let mut state = self.state.write().await;
        match state.backend {
            Some(current) if current != kind => Err(EngineError::BackendAlreadySelected {
                current,
                requested: kind,
            }),
            Some(_) => Ok(()),
            None => {
                state.backend = Some(kind);
                state.client = Some(docker);
                Ok(())
            }
        }
    }

    async fn backend(&self) -> Option<BackendKind> {
        self.state.read().await.backend
    }

    async fn ensure_network(
        &self,
        name: &str,
        driver: NetworkDriver,
        labels: &HashMap<String, String>,
    ) -> EngineResult<String> {
        if !is_valid_name(name) {
            return Err(EngineError::InvalidNetworkName(name.to_string()));
        }
        let docker = self.client().await?;
        let network_error = |e: bollard::errors::Error| EngineError::NetworkError {
            name: name.to_string(),
            reason: e.to_string(),
        };

        let filters = HashMap::from([("name".to_string(), vec![name.to_string()])]);
        let existing = docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await
            .map_err(network_error)?
            .into_iter()
            .find(|network| network.name.as_deref() == Some(name));

        let id = match existing {
            Some(network) => {
                debug!("Reusing network {}", name);
                network.id.unwrap_or_default()
            }
            None => {
                info!("Creating network {} ({})", name, driver);
                docker
                    .create_network(CreateNetworkOptions {
                        name: name.to_string(),
                        driver: driver.to_string(),
                        labels: labels.clone(),
                        ..Default::default()
                    })
                    .await
                    .map_err(network_error)?;
                docker
                    .inspect_network(name, None::<InspectNetworkOptions<String>>)
                    .await
                    .map_err(network_error)?
                    .id
                    .unwrap_or_default()
            }
        };

        self.state.write().await.network = Some(name.to_string());
        Ok(id)
    }

    async fn network(&self) -> Option<String> {
        self.state.read().await.network.clone()
    }

    async fn pull_image(&self, reference: &str) -> EngineResult<()> {
        let docker = self.client().await?;

        if docker.inspect_image(reference).await.is_ok() {
            debug!("Image {} already present", reference);
            return Ok(());
        }

        info!("Pulling image {}", reference);
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };
        let mut stream = docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| EngineError::ImagePullFailed {
                image: reference.to_string(),
                reason: e.to_string(),
            })?;
        }

        info!("Pulled image {}", reference);
        Ok(())
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> EngineResult<String> {
        let docker = self.client().await?;

        if self.container_exists(&spec.name).await? {
            warn!("Container {} already exists, starting it", spec.name);
            self.resume(&spec.name).await?;
            let existing = docker
                .inspect_container(&spec.name, None::<InspectContainerOptions>)
                .await?;
            return Ok(existing.id.unwrap_or_default());
        }

        self.pull_image(&spec.image).await?;

        for volume in spec.named_volumes() {
            self.ensure_volume(volume, &spec.labels).await?;
        }

        let network = self.network().await;
        let config = config_builder::build(spec, network.as_deref())?;
        let create_failed = |e: bollard::errors::Error| EngineError::ContainerCreateFailed {
            name: spec.name.clone(),
            reason: e.to_string(),
        };

        let container = docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(create_failed)?;
        info!("Created container: {} ({})", spec.name, container.id);

        docker
            .start_container(&container.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(create_failed)?;
        info!("Started container: {}", spec.name);

        Ok(container.id)
    }

    async fn stop(&self, name: &str) -> EngineResult<()> {
        let docker = self.client().await?;
        docker
            .stop_container(
                name,
                Some(StopContainerOptions {
                    t: STOP_TIMEOUT_SECS,
                }),
            )
            .await
            .map_err(map_not_found(name))?;
        info!("Container stopped: {}", name);
        Ok(())
    }

    async fn remove(&self, name: &str, remove_volumes: bool) -> EngineResult<()> {
        let docker = self.client().await?;
        docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    v: remove_volumes,
                    link: false,
                }),
            )
            .await
            .map_err(map_not_found(name))?;
        info!("Container removed: {}", name);
        Ok(())
    }

    async fn resume(&self, name: &str) -> EngineResult<()> {
        let docker = self.client().await?;
        docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_not_found(name))?;
        Ok(())
    }

    async fn exec_capture(&self, name: &str, argv: &[String]) -> EngineResult<Vec<u8>> {
        let docker = self.client().await?;
        debug!("Executing in {}: {:?}", name, argv);

        let exec = docker
            .create_exec(
                name,
                CreateExecOptions {
                    cmd: Some(argv.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(map_not_found(name))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        match docker.start_exec(&exec.id, None).await? {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk? {
                        LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
                        LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                        _ => {}
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let code = docker.inspect_exec(&exec.id).await?.exit_code.unwrap_or(-1);
        if code != 0 {
            return Err(EngineError::ExecFailed {
                container: name.to_string(),
                command: argv.join(" "),
                code,
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }

        Ok(stdout)
    }

    async fn logs(&self, name: &str) -> EngineResult<String> {
        let docker = self.client().await?;
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let mut stream = docker.logs(name, Some(options));
        let mut logs = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_not_found(name))?;
            logs.push_str(&chunk.to_string());
        }
        Ok(logs)
    }

    async fn container_exists(&self, name: &str) -> EngineResult<bool> {
        let docker = self.client().await?;
        match docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn volume_exists(&self, name: &str) -> EngineResult<bool> {
        let docker = self.client().await?;
        match docker.inspect_volume(name).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> EngineResult<()> {
        let docker = self.client().await?;
        docker
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                labels: labels.clone(),
                ..Default::default()
            })
            .await?;
        info!("Created volume {}", name);
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> EngineResult<()> {
        let docker = self.client().await?;
        docker
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await
            .map_err(map_not_found(name))?;
        info!("Removed volume {}", name);
        Ok(())
    }

    async fn status(&self, name: &str) -> EngineResult<String> {
        let docker = self.client().await?;
        let container = docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(map_not_found(name))?;

        Ok(container
            .state
            .and_then(|state| state.status)
            .map(|status| status.to_string())
            .unwrap_or_else(|| "unknown".to_string()))
    }

    async fn copy_out(&self, name: &str, src: &str, dest: &Path) -> EngineResult<()> {
        let docker = self.client().await?;
        debug!("Copying {}:{} to {}", name, src, dest.display());

        let mut stream = docker.download_from_container(
            name,
            Some(DownloadFromContainerOptions {
                path: src.to_string(),
            }),
        );
        let mut tarball = Vec::new();
        while let Some(chunk) = stream.next().await {
            tarball.extend_from_slice(&chunk.map_err(map_not_found(name))?);
        }

        let dest = dest.to_path_buf();
        let written = tokio::task::spawn_blocking(move || {
            archive::extract_archive(tarball.as_slice(), &dest)
        })
        .await
        .map_err(|e| EngineError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        info!("Copied {} entries out of {}", written.len(), name);
        Ok(())
    }

    async fn container_env(&self, name: &str, key: &str) -> EngineResult<String> {
        let docker = self.client().await?;
        let container = docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(map_not_found(name))?;

        container
            .config
            .and_then(|config| config.env)
            .unwrap_or_default()
            .iter()
            .find_map(|entry| {
                entry
                    .split_once('=')
                    .filter(|(k, _)| *k == key)
                    .map(|(_, v)| v.to_string())
            })
            .ok_or_else(|| EngineError::EnvNotFound {
                container: name.to_string(),
                key: key.to_string(),
            })
    }
}
