//! CLI command definitions

use super::{CliCommand, CliContext};
use anyhow::Result;
use async_trait::async_trait;
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the resolved configuration as YAML
    Show,
    /// Validate the configuration and the users file
    Check,
    /// Write the default configuration
    Generate {
        /// Destination [default: the --config path]
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[async_trait]
impl CliCommand for ConfigCommands {
    async fn execute(&self, context: &CliContext) -> Result<()> {
        crate::cli::handlers::config::handle_config_command(self, context).await
    }
}
