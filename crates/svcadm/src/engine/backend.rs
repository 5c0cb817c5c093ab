//! Backend selection and socket resolution

use super::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Container engine flavour behind the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Docker,
    Podman,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    /// Default API socket for this backend on the current host.
    pub fn default_socket(&self) -> Result<PathBuf, EngineError> {
        match self {
            Self::Docker => Ok(PathBuf::from(DOCKER_SOCKET)),
            Self::Podman => {
                let uid = current_uid()?;
                Ok(PathBuf::from(format!("/run/user/{uid}/podman/podman.sock")))
            }
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            other => Err(EngineError::InvalidBackend(other.to_string())),
        }
    }
}

/// Driver of the shared service network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkDriver {
    Bridge,
    Host,
    None,
}

impl NetworkDriver {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bridge => "bridge",
            Self::Host => "host",
            Self::None => "none",
        }
    }
}

impl fmt::Display for NetworkDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkDriver {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bridge" => Ok(Self::Bridge),
            "host" => Ok(Self::Host),
            "none" => Ok(Self::None),
            other => Err(EngineError::InvalidNetworkDriver(other.to_string())),
        }
    }
}

/// Where the engine API is reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Local unix socket
    Unix(PathBuf),
    /// Value of `DOCKER_HOST`, used verbatim
    DockerHost(String),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::DockerHost(host) => f.write_str(host),
        }
    }
}

/// Resolve the API endpoint for `kind`.
///
/// `DOCKER_HOST` wins over everything. Otherwise the socket override or the
/// backend's default socket must exist on disk.
pub fn resolve_endpoint(
    kind: BackendKind,
    socket_override: Option<&Path>,
    docker_host: Option<&str>,
) -> Result<Endpoint, EngineError> {
    if let Some(host) = docker_host.filter(|h| !h.trim().is_empty()) {
        return Ok(Endpoint::DockerHost(host.trim().to_string()));
    }

    let socket = match socket_override {
        Some(path) => path.to_path_buf(),
        None => kind.default_socket()?,
    };

    if socket.exists() {
        return Ok(Endpoint::Unix(socket));
    }

    let message = match kind {
        BackendKind::Podman => format!(
            "podman socket not found at {path}; start the user API service with \
             `podman system service --time=0 unix://{path}`",
            path = socket.display()
        ),
        BackendKind::Docker => format!(
            "docker socket not found at {}; is the docker daemon running?",
            socket.display()
        ),
    };
    Err(EngineError::EngineUnavailable { message })
}

fn current_uid() -> Result<u32, EngineError> {
    std::fs::metadata("/proc/self")
        .map(|meta| meta.uid())
        .map_err(|e| EngineError::EngineUnavailable {
            message: format!("cannot determine current uid: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parsing() {
        assert_eq!("docker".parse::<BackendKind>().unwrap(), BackendKind::Docker);
        assert_eq!("podman".parse::<BackendKind>().unwrap(), BackendKind::Podman);
        assert!(matches!(
            "containerd".parse::<BackendKind>(),
            Err(EngineError::InvalidBackend(name)) if name == "containerd"
        ));
    }

    #[test]
    fn test_driver_parsing() {
        for driver in ["bridge", "host", "none"] {
            assert_eq!(driver.parse::<NetworkDriver>().unwrap().as_str(), driver);
        }
        assert!("overlay".parse::<NetworkDriver>().is_err());
    }

    #[test]
    fn test_podman_default_socket_is_per_user() {
        let socket = BackendKind::Podman.default_socket().unwrap();
        let socket = socket.to_string_lossy();
        assert!(socket.starts_with("/run/user/"));
        assert!(socket.ends_with("/podman/podman.sock"));
    }

    #[test]
    fn test_missing_podman_socket_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("podman.sock");

        let err = resolve_endpoint(BackendKind::Podman, Some(&socket), None).unwrap_err();
        match err {
            EngineError::EngineUnavailable { message } => {
                assert!(message.contains(&socket.display().to_string()));
                assert!(message.contains("podman system service"));
            }
            other => panic!("Expected EngineUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_present_socket_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("podman.sock");
        std::fs::write(&socket, b"").unwrap();

        let endpoint = resolve_endpoint(BackendKind::Podman, Some(&socket), None).unwrap();
        assert_eq!(endpoint, Endpoint::Unix(socket));
    }

    #[test]
    fn test_docker_host_overrides_socket() {
        let endpoint = resolve_endpoint(
            BackendKind::Podman,
            Some(Path::new("/nonexistent.sock")),
            Some("tcp://10.0.0.5:2375"),
        )
        .unwrap();
        assert_eq!(endpoint, Endpoint::DockerHost("tcp://10.0.0.5:2375".to_string()));
    }
}
