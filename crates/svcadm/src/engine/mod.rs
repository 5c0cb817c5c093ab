//! Container engine facade
//!
//! A uniform surface over the docker and podman APIs. Everything above this
//! module talks to [`ContainerEngine`]; [`DockerEngine`] is the bollard-backed
//! implementation used at runtime.

pub mod archive;
pub mod backend;
pub mod config_builder;
pub mod docker;
pub mod readiness;
pub mod types;

pub use backend::{BackendKind, Endpoint, NetworkDriver};
pub use config_builder::{RestartMode, RestartPolicySpec};
pub use docker::{DockerEngine, EngineOptions};
pub use readiness::{poll_until, wait_for_container, RetryPolicy};
pub use types::*;

use async_trait::async_trait;
use common::error::SvcadmError;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Errors raised by the engine facade and the readiness waiter
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid backend '{0}' (expected docker or podman)")]
    InvalidBackend(String),

    #[error("Backend already selected as {current}, cannot switch to {requested}")]
    BackendAlreadySelected {
        current: BackendKind,
        requested: BackendKind,
    },

    #[error("Container engine unavailable: {message}")]
    EngineUnavailable { message: String },

    #[error("Container engine not initialized, select a backend first")]
    NotInitialized,

    #[error("Invalid network name '{0}'")]
    InvalidNetworkName(String),

    #[error("Invalid network driver '{0}' (expected bridge, host or none)")]
    InvalidNetworkDriver(String),

    #[error("Network {name} error: {reason}")]
    NetworkError { name: String, reason: String },

    #[error("Failed to pull image {image}: {reason}")]
    ImagePullFailed { image: String, reason: String },

    #[error("Failed to create container {name}: {reason}")]
    ContainerCreateFailed { name: String, reason: String },

    #[error("Invalid restart policy '{0}'")]
    InvalidRestartPolicy(String),

    #[error("Command `{command}` in {container} exited with code {code}: {stderr}")]
    ExecFailed {
        container: String,
        command: String,
        code: i64,
        stdout: String,
        stderr: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Environment variable {key} not set on container {container}")]
    EnvNotFound { container: String, key: String },

    #[error("Unsupported tar entry {path} of type {kind}")]
    UnsupportedTarEntry { path: String, kind: String },

    #[error("{target} not ready after {attempts} attempts")]
    ReadinessTimeout { target: String, attempts: u32 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Engine API error: {0}")]
    Api(#[from] bollard::errors::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SvcadmError for EngineError {}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Api(err) => is_not_found(err),
            _ => false,
        }
    }

    /// Stdout captured by a failed exec, empty for every other error.
    pub fn exec_stdout(&self) -> &str {
        match self {
            Self::ExecFailed { stdout, .. } => stdout,
            _ => "",
        }
    }
}

/// Whether a bollard error is a 404 from the engine.
pub(crate) fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Uniform container operations over the selected backend.
///
/// The implementation owns the single engine client of the process together
/// with the selected backend and network.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Connect to `kind`. Repeating the same selection is a no-op; switching
    /// to the other backend fails.
    async fn select_backend(&self, kind: BackendKind) -> EngineResult<()>;

    async fn backend(&self) -> Option<BackendKind>;

    /// Reuse the network called `name` or create it. Returns the network id.
    async fn ensure_network(
        &self,
        name: &str,
        driver: NetworkDriver,
        labels: &HashMap<String, String>,
    ) -> EngineResult<String>;

    async fn network(&self) -> Option<String>;

    /// Pull `reference` unless a local image already carries that tag.
    async fn pull_image(&self, reference: &str) -> EngineResult<()>;

    /// Pull the image, create the container on the configured network and
    /// start it. Returns the container id.
    async fn create_and_start(&self, spec: &ContainerSpec) -> EngineResult<String>;

    async fn stop(&self, name: &str) -> EngineResult<()>;

    async fn remove(&self, name: &str, remove_volumes: bool) -> EngineResult<()>;

    async fn resume(&self, name: &str) -> EngineResult<()>;

    /// Run `argv` inside the container, failing on a non-zero exit code.
    async fn exec(&self, name: &str, argv: &[String]) -> EngineResult<()> {
        self.exec_capture(name, argv).await.map(|_| ())
    }

    /// Run `argv` and return its stdout. A non-zero exit yields
    /// [`EngineError::ExecFailed`] carrying both streams.
    async fn exec_capture(&self, name: &str, argv: &[String]) -> EngineResult<Vec<u8>>;

    async fn logs(&self, name: &str) -> EngineResult<String>;

    async fn container_exists(&self, name: &str) -> EngineResult<bool>;

    async fn volume_exists(&self, name: &str) -> EngineResult<bool>;

    async fn create_volume(&self, name: &str, labels: &HashMap<String, String>)
        -> EngineResult<()>;

    async fn remove_volume(&self, name: &str) -> EngineResult<()>;

    /// Container state as reported by the engine (`running`, `exited`, ...)
    async fn status(&self, name: &str) -> EngineResult<String>;

    /// Copy `src` out of the container and unpack it below `dest`.
    async fn copy_out(&self, name: &str, src: &str, dest: &Path) -> EngineResult<()>;

    /// Value of `key` in the container's configured environment.
    async fn container_env(&self, name: &str, key: &str) -> EngineResult<String>;
}
