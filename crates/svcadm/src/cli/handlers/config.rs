//! Configuration command handlers

use super::HandlerUtils;
use crate::cli::commands::ConfigCommands;
use crate::cli::CliContext;
use crate::config::{Configuration, DEFAULT_CONFIG_TEMPLATE};
use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::info;

pub async fn handle_config_command(command: &ConfigCommands, context: &CliContext) -> Result<()> {
    match command {
        ConfigCommands::Show => show_config(&context.config_path),
        ConfigCommands::Check => check_config(&context.config_path),
        ConfigCommands::Generate { output, force } => {
            let output = output.as_deref().unwrap_or(&context.config_path);
            generate_config(output, *force).await
        }
    }
}

fn show_config(config_path: &Path) -> Result<()> {
    let config = HandlerUtils::load_config(config_path)?;
    print!("{}", render_config(&config)?);
    Ok(())
}

fn render_config(config: &Configuration) -> Result<String> {
    serde_yaml::to_string(config).context("Failed to render configuration")
}

fn check_config(config_path: &Path) -> Result<()> {
    let config = HandlerUtils::load_config(config_path)?;
    let users = HandlerUtils::load_users(&config)?;

    let enabled: Vec<&str> = config.enabled_services().map(|s| s.name.as_str()).collect();
    HandlerUtils::print_success(&format!("{} is valid", config_path.display()));
    HandlerUtils::print_info(&format!(
        "{} enabled service(s): {}",
        enabled.len(),
        enabled.join(", ")
    ));
    HandlerUtils::print_info(&format!(
        "{} admin(s), {} user(s)",
        users.admins.len(),
        users.users.len()
    ));
    Ok(())
}

async fn generate_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite it",
            output.display()
        );
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(output, DEFAULT_CONFIG_TEMPLATE)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!("Wrote default configuration to {}", output.display());
    HandlerUtils::print_success(&format!("Configuration written to {}", output.display()));
    Ok(())
}
