//! CLI command handlers

use crate::cli::CliContext;
use crate::config::{Configuration, UserSet};
use crate::engine::{DockerEngine, EngineOptions};
use crate::orchestrator::Orchestrator;
use crate::services::ServiceContext;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod config;
pub mod lifecycle;

const KERNEL_HOSTNAME: &str = "/proc/sys/kernel/hostname";

pub struct HandlerUtils;

impl HandlerUtils {
    pub fn load_config(config_path: &Path) -> Result<Configuration> {
        Configuration::load_from_file(config_path)
            .with_context(|| format!("Failed to load configuration {}", config_path.display()))
    }

    pub fn load_users(config: &Configuration) -> Result<UserSet> {
        let path = config.general.access.logins_path()?;
        UserSet::load(&path)
            .with_context(|| format!("Failed to load users file {}", path.display()))
    }

    /// Configured hostname, else the machine hostname, else `localhost`
    pub fn resolve_hostname(config: &Configuration) -> String {
        if let Some(hostname) = config
            .general
            .operator
            .hostname
            .as_deref()
            .filter(|h| !h.trim().is_empty())
        {
            return hostname.trim().to_string();
        }
        std::fs::read_to_string(KERNEL_HOSTNAME)
            .ok()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }

    /// Wire a Docker-API engine, the configuration and the users into an
    /// orchestrator. The users file is only read when `with_users` is set.
    pub fn build_orchestrator(context: &CliContext, with_users: bool) -> Result<Orchestrator> {
        let config = Self::load_config(&context.config_path)?;
        let users = if with_users {
            Self::load_users(&config)?
        } else {
            UserSet::default()
        };

        let options = EngineOptions::from_env(config.general.operator.socket.clone());
        let hostname = Self::resolve_hostname(&config);

        let ctx = ServiceContext {
            engine: Arc::new(DockerEngine::new(options)),
            config: Arc::new(RwLock::new(config)),
            users: Arc::new(RwLock::new(users)),
            paths: context.paths.clone(),
            hostname,
            cancel: context.cancel.clone(),
        };
        Ok(Orchestrator::new(ctx))
    }

    pub fn format_table<T: std::fmt::Display>(headers: &[&str], rows: &[Vec<T>]) -> String {
        let mut output = String::new();

        let header: Vec<String> = headers.iter().map(|h| format!("{h:<20}")).collect();
        output.push_str(header.join(" | ").trim_end());
        output.push('\n');
        output.push_str(&"-".repeat(headers.len() * 23));
        output.push('\n');

        for row in rows {
            let row_str: Vec<String> = row.iter().map(|cell| format!("{cell:<20}")).collect();
            output.push_str(row_str.join(" | ").trim_end());
            output.push('\n');
        }

        output
    }

    pub fn print_success(message: &str) {
        println!("[SUCCESS] {message}");
    }

    pub fn print_error(message: &str) {
        eprintln!("[ERROR] {message}");
    }

    pub fn print_info(message: &str) {
        println!("[INFO] {message}");
    }

    pub fn print_warning(message: &str) {
        println!("[WARNING] {message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_hostname_wins() {
        let mut config = Configuration::default();
        config.general.operator.hostname = Some(" devbox.example.org ".to_string());
        assert_eq!(HandlerUtils::resolve_hostname(&config), "devbox.example.org");
    }

    #[test]
    fn test_hostname_fallback_is_never_empty() {
        let config = Configuration::default();
        assert!(!HandlerUtils::resolve_hostname(&config).is_empty());
    }

    #[test]
    fn test_format_table() {
        let table = HandlerUtils::format_table(
            &["SERVICE", "STATE"],
            &[vec!["postgresql", "running"], vec!["vault", "absent"]],
        );
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("SERVICE"));
        assert!(lines[2].starts_with("postgresql"));
        assert!(lines[3].ends_with("absent"));
    }
}
