//! CLI interface for svcadm

use anyhow::Result;
use async_trait::async_trait;
use clap::Subcommand;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

pub mod args;
pub mod commands;
pub mod handlers;

use commands::*;

pub use args::SvcadmArgs;

#[async_trait]
pub trait CliCommand {
    async fn execute(&self, context: &CliContext) -> Result<()>;
}

pub struct CliContext {
    pub config_path: PathBuf,
    pub paths: crate::paths::SvcadmPaths,
    /// Fired on Ctrl-C
    pub cancel: CancellationToken,
}

impl CliContext {
    pub fn new(config_path: PathBuf, paths: crate::paths::SvcadmPaths) -> Self {
        Self {
            config_path,
            paths,
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start every enabled service and provision users
    Setup,
    /// Show the container state of every enabled service
    Status,
    /// Remove containers, volumes and generated state of enabled services
    Cleanup,
    /// Back up every enabled service with backups enabled
    Backup,
    /// Inspect or generate the configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

pub async fn execute_command(command: &Commands, context: &CliContext) -> Result<()> {
    command.execute(context).await
}

#[async_trait]
impl CliCommand for Commands {
    async fn execute(&self, context: &CliContext) -> Result<()> {
        match self {
            Commands::Setup => handlers::lifecycle::handle_setup(context).await,
            Commands::Status => handlers::lifecycle::handle_status(context).await,
            Commands::Cleanup => handlers::lifecycle::handle_cleanup(context).await,
            Commands::Backup => handlers::lifecycle::handle_backup(context).await,
            Commands::Config(cmd) => cmd.execute(context).await,
        }
    }
}
