//! # svcadm
//!
//! Brings up, inspects, backs up and tears down a set of containerised
//! developer services on a single docker or podman host.

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};

use common::journal::{init_journal, JournalOptions};
use svcadm::cli::{execute_command, CliContext, SvcadmArgs};
use svcadm::SvcadmPaths;

#[tokio::main]
async fn main() -> Result<()> {
    let args = SvcadmArgs::parse_args();
    let paths = SvcadmPaths::from_home_dir()?;

    init_journal(&JournalOptions {
        level: args.loglevel.clone(),
        log_file: Some(paths.log_file()),
    })
    .context("Failed to initialize logging")?;

    let context = CliContext::new(args.config_path(&paths), paths);
    info!("svcadm {} using {}", svcadm::VERSION, context.config_path.display());

    let cancel = context.cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, cancelling...");
            cancel.cancel();
        }
    });

    if let Err(e) = execute_command(&args.command, &context).await {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}
