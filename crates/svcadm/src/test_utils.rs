//! Test utilities for svcadm
//!
//! [`FakeEngine`] is an in-memory [`ContainerEngine`]: it keeps containers,
//! volumes and the network in a map, records every exec and answers execs
//! from scripted responses.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::{Configuration, ContainerSettings, ImageSpec, ServiceSpec, User, UserSet};
use crate::engine::{
    config_builder, BackendKind, ContainerEngine, ContainerSpec, EngineError, EngineResult,
    NetworkDriver,
};
use crate::paths::SvcadmPaths;
use crate::services::ServiceContext;

/// Hostname used by [`test_context`]
pub const TEST_HOSTNAME: &str = "svcadm.test";

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub spec: ContainerSpec,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRecord {
    pub container: String,
    pub argv: Vec<String>,
}

impl ExecRecord {
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// Scripted answer to an exec
#[derive(Debug, Clone)]
pub enum ExecResponse {
    Stdout(String),
    Fail {
        code: i64,
        stdout: String,
        stderr: String,
    },
}

impl ExecResponse {
    pub fn stdout(out: impl Into<String>) -> Self {
        Self::Stdout(out.into())
    }

    pub fn fail(code: i64, stderr: impl Into<String>) -> Self {
        Self::Fail {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Responder {
    container: String,
    prefix: Vec<String>,
    response: ExecResponse,
    once: bool,
}

impl Responder {
    /// Each prefix element must start the argv element at the same index.
    fn matches(&self, container: &str, argv: &[String]) -> bool {
        self.container == container
            && argv.len() >= self.prefix.len()
            && self
                .prefix
                .iter()
                .zip(argv)
                .all(|(prefix, arg)| arg.starts_with(prefix.as_str()))
    }
}

#[derive(Debug, Default)]
struct FakeState {
    backend: Option<BackendKind>,
    network: Option<String>,
    networks: BTreeMap<String, (NetworkDriver, HashMap<String, String>)>,
    containers: BTreeMap<String, FakeContainer>,
    volumes: BTreeMap<String, HashMap<String, String>>,
    pulled: Vec<String>,
    execs: Vec<ExecRecord>,
    responders: Vec<Responder>,
    failing_creates: HashSet<String>,
    failing_volume_removals: HashSet<String>,
    status_checks: usize,
    started: Vec<String>,
    requested: Vec<ContainerSpec>,
    next_id: u64,
}

/// In-memory container engine
#[derive(Debug, Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer every exec in `container` whose argv starts with `prefix`,
    /// element by element. Later registrations take precedence.
    pub fn respond(&self, container: &str, prefix: &[&str], response: ExecResponse) {
        self.push_responder(container, prefix, response, false);
    }

    /// Answer the next matching exec only. One-shot answers are consumed
    /// in registration order before persistent ones apply.
    pub fn respond_once(&self, container: &str, prefix: &[&str], response: ExecResponse) {
        self.push_responder(container, prefix, response, true);
    }

    fn push_responder(&self, container: &str, prefix: &[&str], response: ExecResponse, once: bool) {
        self.lock().responders.push(Responder {
            container: container.to_string(),
            prefix: prefix.iter().map(|p| p.to_string()).collect(),
            response,
            once,
        });
    }

    /// Make `create_and_start` fail for the container called `name`.
    pub fn fail_create(&self, name: &str) {
        self.lock().failing_creates.insert(name.to_string());
    }

    /// Make every removal of volume `name` fail while leaving it in place.
    pub fn fail_remove_volume(&self, name: &str) {
        self.lock().failing_volume_removals.insert(name.to_string());
    }

    /// Seed an existing container, as left over by an earlier run.
    pub fn insert_container(&self, spec: ContainerSpec, state: &str) -> String {
        let mut guard = self.lock();
        let id = next_container_id(&mut guard);
        guard.containers.insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                spec,
                state: state.to_string(),
            },
        );
        id
    }

    pub fn insert_volume(&self, name: &str) {
        self.lock().volumes.insert(name.to_string(), HashMap::new());
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.lock().containers.get(name).cloned()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.lock().containers.keys().cloned().collect()
    }

    pub fn volume_names(&self) -> Vec<String> {
        self.lock().volumes.keys().cloned().collect()
    }

    pub fn volume_labels(&self, name: &str) -> Option<HashMap<String, String>> {
        self.lock().volumes.get(name).cloned()
    }

    pub fn network_labels(&self, name: &str) -> Option<HashMap<String, String>> {
        self.lock()
            .networks
            .get(name)
            .map(|(_, labels)| labels.clone())
    }

    pub fn pulled_images(&self) -> Vec<String> {
        self.lock().pulled.clone()
    }

    /// Number of `status` calls so far
    pub fn status_checks(&self) -> usize {
        self.lock().status_checks
    }

    /// Container names in the order `create_and_start` was called
    pub fn start_order(&self) -> Vec<String> {
        self.lock().started.clone()
    }

    /// Every spec passed to `create_and_start`, including re-runs that
    /// resumed an existing container
    pub fn requested_specs(&self) -> Vec<ContainerSpec> {
        self.lock().requested.clone()
    }

    pub fn execs(&self) -> Vec<ExecRecord> {
        self.lock().execs.clone()
    }

    /// Command lines executed in `container`, in order
    pub fn exec_lines(&self, container: &str) -> Vec<String> {
        self.lock()
            .execs
            .iter()
            .filter(|record| record.container == container)
            .map(ExecRecord::command_line)
            .collect()
    }

    fn respond_to(&self, container: &str, argv: &[String]) -> ExecResponse {
        let mut guard = self.lock();
        guard.execs.push(ExecRecord {
            container: container.to_string(),
            argv: argv.to_vec(),
        });

        let once = guard
            .responders
            .iter()
            .position(|r| r.once && r.matches(container, argv));
        if let Some(index) = once {
            return guard.responders.remove(index).response;
        }
        guard
            .responders
            .iter()
            .rev()
            .find(|r| !r.once && r.matches(container, argv))
            .map(|r| r.response.clone())
            .unwrap_or_else(|| ExecResponse::Stdout(String::new()))
    }

    fn require_backend(&self) -> EngineResult<()> {
        match self.lock().backend {
            Some(_) => Ok(()),
            None => Err(EngineError::NotInitialized),
        }
    }
}

fn next_container_id(state: &mut FakeState) -> String {
    state.next_id += 1;
    format!("{:064x}", 0xfa4e_0000_u64 + state.next_id)
}

fn not_found(name: &str) -> EngineError {
    EngineError::NotFound(name.to_string())
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn select_backend(&self, kind: BackendKind) -> EngineResult<()> {
        let mut state = self.lock();
        match state.backend {
            Some(current) if current != kind => Err(EngineError::BackendAlreadySelected {
                current,
                requested: kind,
            }),
            _ => {
                state.backend = Some(kind);
                Ok(())
            }
        }
    }

    async fn backend(&self) -> Option<BackendKind> {
        self.lock().backend
    }

    async fn ensure_network(
        &self,
        name: &str,
        driver: NetworkDriver,
        labels: &HashMap<String, String>,
    ) -> EngineResult<String> {
        self.require_backend()?;
        if name.trim().is_empty() {
            return Err(EngineError::InvalidNetworkName(name.to_string()));
        }
        let mut state = self.lock();
        state
            .networks
            .entry(name.to_string())
            .or_insert_with(|| (driver, labels.clone()));
        state.network = Some(name.to_string());
        Ok(format!("net-{name}"))
    }

    async fn network(&self) -> Option<String> {
        self.lock().network.clone()
    }

    async fn pull_image(&self, reference: &str) -> EngineResult<()> {
        self.require_backend()?;
        let mut state = self.lock();
        if !state.pulled.iter().any(|image| image == reference) {
            state.pulled.push(reference.to_string());
        }
        Ok(())
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> EngineResult<String> {
        self.require_backend()?;
        let network = self.lock().network.clone();
        config_builder::build(spec, network.as_deref())?;

        let mut state = self.lock();
        state.started.push(spec.name.clone());
        state.requested.push(spec.clone());

        if let Some(existing) = state.containers.get_mut(&spec.name) {
            existing.state = "running".to_string();
            return Ok(existing.id.clone());
        }
        if state.failing_creates.contains(&spec.name) {
            return Err(EngineError::ContainerCreateFailed {
                name: spec.name.clone(),
                reason: "scripted failure".to_string(),
            });
        }

        if !state.pulled.iter().any(|image| image == &spec.image) {
            state.pulled.push(spec.image.clone());
        }
        for volume in spec.named_volumes() {
            state
                .volumes
                .entry(volume.to_string())
                .or_insert_with(|| spec.labels.clone());
        }

        let id = next_container_id(&mut state);
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                spec: spec.clone(),
                state: "running".to_string(),
            },
        );
        Ok(id)
    }

    async fn stop(&self, name: &str) -> EngineResult<()> {
        let mut state = self.lock();
        let container = state.containers.get_mut(name).ok_or_else(|| not_found(name))?;
        container.state = "exited".to_string();
        Ok(())
    }

    async fn remove(&self, name: &str, _remove_volumes: bool) -> EngineResult<()> {
        self.lock()
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn resume(&self, name: &str) -> EngineResult<()> {
        let mut state = self.lock();
        let container = state.containers.get_mut(name).ok_or_else(|| not_found(name))?;
        container.state = "running".to_string();
        Ok(())
    }

    async fn exec_capture(&self, name: &str, argv: &[String]) -> EngineResult<Vec<u8>> {
        let running = self
            .lock()
            .containers
            .get(name)
            .map(|c| c.state == "running")
            .ok_or_else(|| not_found(name))?;
        if !running {
            return Err(EngineError::ExecFailed {
                container: name.to_string(),
                command: argv.join(" "),
                code: -1,
                stdout: String::new(),
                stderr: "container is not running".to_string(),
            });
        }

        match self.respond_to(name, argv) {
            ExecResponse::Stdout(out) => Ok(out.into_bytes()),
            ExecResponse::Fail {
                code,
                stdout,
                stderr,
            } => Err(EngineError::ExecFailed {
                container: name.to_string(),
                command: argv.join(" "),
                code,
                stdout,
                stderr,
            }),
        }
    }

    async fn logs(&self, name: &str) -> EngineResult<String> {
        let state = self.lock();
        let container = state.containers.get(name).ok_or_else(|| not_found(name))?;
        Ok(format!("{} is {}\n", container.spec.name, container.state))
    }

    async fn container_exists(&self, name: &str) -> EngineResult<bool> {
        Ok(self.lock().containers.contains_key(name))
    }

    async fn volume_exists(&self, name: &str) -> EngineResult<bool> {
        Ok(self.lock().volumes.contains_key(name))
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> EngineResult<()> {
        self.lock()
            .volumes
            .entry(name.to_string())
            .or_insert_with(|| labels.clone());
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> EngineResult<()> {
        let mut state = self.lock();
        if state.failing_volume_removals.contains(name) {
            return Err(EngineError::Io(std::io::Error::other(format!(
                "volume {name} is in use"
            ))));
        }
        state
            .volumes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    async fn status(&self, name: &str) -> EngineResult<String> {
        let mut state = self.lock();
        state.status_checks += 1;
        state
            .containers
            .get(name)
            .map(|c| c.state.clone())
            .ok_or_else(|| not_found(name))
    }

    /// Writes a placeholder file named after the last component of `src`.
    async fn copy_out(&self, name: &str, src: &str, dest: &Path) -> EngineResult<()> {
        let exists = self.lock().containers.contains_key(name);
        if !exists {
            return Err(not_found(name));
        }
        let file_name = src
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or("root");
        tokio::fs::create_dir_all(dest).await?;
        tokio::fs::write(dest.join(file_name), format!("{name}:{src}\n")).await?;
        Ok(())
    }

    async fn container_env(&self, name: &str, key: &str) -> EngineResult<String> {
        let state = self.lock();
        let container = state.containers.get(name).ok_or_else(|| not_found(name))?;
        container
            .spec
            .env_value(key)
            .map(str::to_string)
            .ok_or_else(|| EngineError::EnvNotFound {
                container: name.to_string(),
                key: key.to_string(),
            })
    }
}

/// A service spec with the conventional container name `svcadm-<name>`
pub fn service_spec(name: &str) -> ServiceSpec {
    ServiceSpec {
        name: name.to_string(),
        enabled: true,
        image: ImageSpec {
            repository: format!("docker.io/library/{name}"),
            tag: "latest".to_string(),
        },
        container: ContainerSettings {
            name: format!("svcadm-{name}"),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A configuration enabling `names` with default specs
pub fn configuration(names: &[&str]) -> Configuration {
    Configuration {
        services: names.iter().map(|name| service_spec(name)).collect(),
        ..Default::default()
    }
}

pub fn user(username: &str, password: &str) -> User {
    User {
        username: username.to_string(),
        password: password.to_string(),
        email: format!("{username}@example.org"),
    }
}

/// One admin `adm` with password `hunter22`
pub fn single_admin() -> UserSet {
    UserSet {
        admins: vec![user("adm", "hunter22")],
        users: Vec::new(),
    }
}

/// A service context over `engine` with `home` as the svcadm home.
pub fn test_context(
    engine: Arc<dyn ContainerEngine>,
    config: Configuration,
    users: UserSet,
    home: &Path,
) -> ServiceContext {
    ServiceContext {
        engine,
        config: Arc::new(RwLock::new(config)),
        users: Arc::new(RwLock::new(users)),
        paths: SvcadmPaths::new(home),
        hostname: TEST_HOSTNAME.to_string(),
        cancel: CancellationToken::new(),
    }
}
