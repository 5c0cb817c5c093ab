//! CLI argument parsing
//!
//! Global flags shared by every subcommand plus the subcommand itself.

use super::Commands;
use crate::paths::SvcadmPaths;
use clap::Parser;
use std::path::PathBuf;

/// Log levels accepted by `--loglevel`
pub const LOG_LEVELS: [&str; 5] = ["debug", "info", "warn", "error", "fatal"];

/// Main application arguments
#[derive(Parser, Debug)]
#[command(name = "svcadm", author, version, about, long_about = None)]
pub struct SvcadmArgs {
    /// Configuration file path [default: $HOME/.svcadm/svcadm.yaml]
    #[arg(short, long, global = true, env = "SVCADM_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(
        short,
        long,
        global = true,
        default_value = "info",
        value_parser = LOG_LEVELS
    )]
    pub loglevel: String,

    #[command(subcommand)]
    pub command: Commands,
}

impl SvcadmArgs {
    /// Parse arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The explicit `--config`, else the default under the svcadm home
    pub fn config_path(&self, paths: &SvcadmPaths) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| paths.default_config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{commands::ConfigCommands, Commands};

    #[test]
    fn test_defaults() {
        let args = SvcadmArgs::try_parse_from(["svcadm", "status"]).unwrap();
        assert_eq!(args.loglevel, "info");
        assert!(matches!(args.command, Commands::Status));

        let paths = SvcadmPaths::new("/home/dev/.svcadm");
        assert_eq!(
            args.config_path(&paths),
            PathBuf::from("/home/dev/.svcadm/svcadm.yaml")
        );
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = SvcadmArgs::try_parse_from([
            "svcadm",
            "setup",
            "--config",
            "/tmp/svcadm.yaml",
            "-l",
            "fatal",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/svcadm.yaml")));
        assert_eq!(args.loglevel, "fatal");
    }

    #[test]
    fn test_rejects_unknown_level() {
        assert!(SvcadmArgs::try_parse_from(["svcadm", "-l", "trace", "status"]).is_err());
    }

    #[test]
    fn test_config_generate() {
        let args =
            SvcadmArgs::try_parse_from(["svcadm", "config", "generate", "--force"]).unwrap();
        match args.command {
            Commands::Config(ConfigCommands::Generate { output, force }) => {
                assert!(output.is_none());
                assert!(force);
            }
            other => panic!("Expected config generate, got {other:?}"),
        }
    }
}
