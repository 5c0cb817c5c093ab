//! Filesystem layout under `$HOME/.svcadm`

use std::path::{Path, PathBuf};

use common::error::ConfigurationError;

const SVCADM_DIR: &str = ".svcadm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvcadmPaths {
    home: PathBuf,
}

impl SvcadmPaths {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// `$HOME/.svcadm` for the current user
    pub fn from_home_dir() -> Result<Self, ConfigurationError> {
        let home = dirs::home_dir().ok_or_else(|| ConfigurationError::EnvironmentError {
            var: "HOME".to_string(),
            details: "cannot determine home directory".to_string(),
        })?;
        Ok(Self::new(home.join(SVCADM_DIR)))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn default_config(&self) -> PathBuf {
        self.home.join("svcadm.yaml")
    }

    pub fn log_file(&self) -> PathBuf {
        self.home.join("logs").join("svcadm.log")
    }

    /// Rendered reverse-proxy configuration
    pub fn nginx_dir(&self) -> PathBuf {
        self.home.join("nginxadm")
    }

    /// Vault root token and unseal shares
    pub fn vault_dir(&self) -> PathBuf {
        self.home.join("vaultadm")
    }
}
