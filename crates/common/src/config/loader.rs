//! # Configuration Loader
//!
//! Figment-based configuration loading with layered support:
//! 1. Compiled defaults
//! 2. Configuration file (YAML)
//! 3. Environment variable overrides
//!
//! Supports automatic environment variable mapping with prefixes.

use crate::error::ConfigurationError;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable prefix for svcadm
pub const DEFAULT_ENV_PREFIX: &str = "SVCADM";

/// Load configuration from specific file
///
/// # Arguments
/// * `path` - Path to configuration file
///
/// # Returns
/// * Configuration loaded from file with `SVCADM_*` environment overrides
///
/// # Environment Variable Mapping
/// - Nested fields use double underscore: `SVCADM_GENERAL__OPERATOR__NAME`
/// - Case insensitive matching
pub fn load_from_file<T>(path: &Path) -> Result<T, ConfigurationError>
where
    T: Default + DeserializeOwned + serde::Serialize,
{
    let options = LoadOptions {
        config_path: Some(path.to_path_buf()),
        env_prefix: Some(DEFAULT_ENV_PREFIX.to_string()),
        require_file: true,
    };
    load_config_with_options::<T>(options)
}

/// Load a data file (no environment overrides), e.g. the users file.
pub fn load_data_file<T>(path: &Path) -> Result<T, ConfigurationError>
where
    T: Default + DeserializeOwned + serde::Serialize,
{
    let options = LoadOptions {
        config_path: Some(path.to_path_buf()),
        env_prefix: None,
        require_file: true,
    };
    load_config_with_options::<T>(options)
}

/// Configuration loading options
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Optional path to configuration file
    pub config_path: Option<PathBuf>,
    /// Environment variable prefix, `None` disables environment overrides
    pub env_prefix: Option<String>,
    /// Whether configuration file is required
    pub require_file: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            config_path: None,
            env_prefix: Some(DEFAULT_ENV_PREFIX.to_string()),
            require_file: false,
        }
    }
}

/// Load configuration with custom options
pub fn load_config_with_options<T>(options: LoadOptions) -> Result<T, ConfigurationError>
where
    T: Default + DeserializeOwned + serde::Serialize,
{
    debug!("Loading configuration with options: {:?}", options);

    let mut figment = Figment::new().merge(Serialized::defaults(T::default()));

    if let Some(path) = &options.config_path {
        if path.exists() {
            info!("Loading configuration from file: {}", path.display());
            figment = add_file_provider(figment, path)?;
        } else if options.require_file {
            return Err(ConfigurationError::FileNotFound {
                path: path.display().to_string(),
            });
        } else {
            warn!(
                "Configuration file not found: {} (using defaults)",
                path.display()
            );
        }
    }

    if let Some(prefix) = &options.env_prefix {
        debug!("Loading environment variables with prefix: {}", prefix);
        figment = figment.merge(
            Env::prefixed(&format!("{prefix}_"))
                .split("__")
                .ignore(&["CONFIG_PATH"]),
        );
    }

    let config: T = figment
        .extract()
        .map_err(|err| ConfigurationError::ParseError {
            details: format!("Failed to parse configuration: {err}"),
        })?;

    debug!(
        "Configuration loaded from {} sources",
        figment.metadata().count()
    );

    Ok(config)
}

/// Add file provider to figment based on file extension
fn add_file_provider(figment: Figment, path: &Path) -> Result<Figment, ConfigurationError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("yaml");

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => {
            let contents =
                std::fs::read_to_string(path).map_err(|e| ConfigurationError::ReadError {
                    path: path.display().to_string(),
                    source: Box::new(e),
                })?;
            Ok(figment.merge(Yaml::string(&contents)))
        }
        _ => Err(ConfigurationError::ParseError {
            details: format!(
                "Unsupported configuration file format: {extension} (supported: yaml, yml)"
            ),
        }),
    }
}

/// Validate configuration file format
pub fn validate_config_file(path: &Path) -> Result<(), ConfigurationError> {
    if !path.exists() {
        return Err(ConfigurationError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(()),
        _ => Err(ConfigurationError::ParseError {
            details: format!(
                "Unsupported configuration file format: {extension} (supported: yaml, yml)"
            ),
        }),
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_path(path: &str) -> Result<PathBuf, ConfigurationError> {
    let Some(rest) = path.strip_prefix('~') else {
        return Ok(PathBuf::from(path));
    };

    let home = dirs::home_dir().ok_or_else(|| ConfigurationError::EnvironmentError {
        var: "HOME".to_string(),
        details: "cannot determine home directory".to_string(),
    })?;

    Ok(home.join(rest.trim_start_matches('/')))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serial_test::serial;
    use std::env;
    use tempfile::NamedTempFile;

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
    struct TestConfig {
        pub name: String,
        pub port: u16,
        pub nested: NestedConfig,
    }

    #[derive(Debug, Default, Deserialize, Serialize, PartialEq)]
    struct NestedConfig {
        pub enabled: bool,
        pub timeout: u64,
    }

    fn yaml_file(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        std::io::Write::write_all(&mut temp_file, content.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    #[serial]
    fn test_load_from_yaml_file() {
        env::remove_var("SVCADM_NAME");
        env::remove_var("SVCADM_NESTED__TIMEOUT");

        let file = yaml_file("name: test\nport: 8080\nnested:\n  enabled: true\n  timeout: 30\n");

        let config: TestConfig = load_from_file(file.path()).unwrap();
        assert_eq!(config.name, "test");
        assert_eq!(config.port, 8080);
        assert!(config.nested.enabled);
        assert_eq!(config.nested.timeout, 30);
    }

    #[test]
    #[serial]
    fn test_env_var_overrides() {
        let file = yaml_file("name: test\nport: 8080\n");
        env::set_var("SVCADM_NAME", "env_test");
        env::set_var("SVCADM_NESTED__TIMEOUT", "60");

        let config: TestConfig = load_from_file(file.path()).unwrap();
        assert_eq!(config.name, "env_test");
        assert_eq!(config.port, 8080);
        assert_eq!(config.nested.timeout, 60);

        env::remove_var("SVCADM_NAME");
        env::remove_var("SVCADM_NESTED__TIMEOUT");
    }

    #[test]
    #[serial]
    fn test_data_file_ignores_environment() {
        let file = yaml_file("name: from-file\n");
        env::set_var("SVCADM_NAME", "env_test");

        let config: TestConfig = load_data_file(file.path()).unwrap();
        assert_eq!(config.name, "from-file");

        env::remove_var("SVCADM_NAME");
    }

    #[test]
    fn test_file_not_found_when_required() {
        let non_existent_path = PathBuf::from("/non/existent/svcadm.yaml");
        let result: Result<TestConfig, _> = load_from_file(&non_existent_path);

        match result.unwrap_err() {
            ConfigurationError::FileNotFound { path } => {
                assert_eq!(path, "/non/existent/svcadm.yaml");
            }
            other => panic!("Expected FileNotFound error, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_yaml_is_a_parse_error() {
        let file = yaml_file("name: [unterminated\n");
        let result: Result<TestConfig, _> = load_data_file(file.path());
        assert!(matches!(result, Err(ConfigurationError::ParseError { .. })));
    }

    #[test]
    fn test_unreadable_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svcadm.yaml");
        std::fs::create_dir(&path).unwrap();

        let result: Result<TestConfig, _> = load_data_file(&path);
        match result.unwrap_err() {
            ConfigurationError::ReadError { path: reported, .. } => {
                assert_eq!(reported, path.display().to_string());
            }
            other => panic!("Expected ReadError, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_config_file() {
        let file = yaml_file("name: test\n");
        assert!(validate_config_file(file.path()).is_ok());

        let toml = NamedTempFile::with_suffix(".toml").unwrap();
        assert!(validate_config_file(toml.path()).is_err());

        assert!(validate_config_file(Path::new("/non/existent.yaml")).is_err());
    }

    #[test]
    fn test_expand_path() {
        if dirs::home_dir().is_some() {
            let expanded = expand_path("~/.svcadm/logins.yaml").unwrap();
            assert!(!expanded.to_string_lossy().contains('~'));
            assert!(expanded.ends_with(".svcadm/logins.yaml"));
        }

        let regular = expand_path("/etc/svcadm.yaml").unwrap();
        assert_eq!(regular, PathBuf::from("/etc/svcadm.yaml"));
    }
}
