//! Handlers for setup, status, cleanup and backup

use super::HandlerUtils;
use crate::cli::CliContext;
use crate::orchestrator::{OperationReport, StartReport};
use anyhow::{Context, Result};
use tracing::info;

pub async fn handle_setup(context: &CliContext) -> Result<()> {
    let orchestrator = HandlerUtils::build_orchestrator(context, true)?;

    orchestrator
        .initialize_engine()
        .await
        .context("Failed to initialize the container engine")?;

    let report = orchestrator.start_services().await?;
    print_start_report(&report);
    report.into_result()?;

    HandlerUtils::print_success("All services are up");
    Ok(())
}

pub async fn handle_status(context: &CliContext) -> Result<()> {
    let orchestrator = HandlerUtils::build_orchestrator(context, false)?;
    orchestrator.connect_engine().await?;

    let states = orchestrator.fetch_services_status().await?;
    if states.is_empty() {
        HandlerUtils::print_info("No services enabled");
    }
    for (name, state) in states {
        println!("{name}: {state}");
    }
    Ok(())
}

pub async fn handle_cleanup(context: &CliContext) -> Result<()> {
    let orchestrator = HandlerUtils::build_orchestrator(context, false)?;
    orchestrator.connect_engine().await?;

    let report = orchestrator.cleanup_services().await?;
    print_operation_report(&report);
    report.into_result()?;
    Ok(())
}

pub async fn handle_backup(context: &CliContext) -> Result<()> {
    let orchestrator = HandlerUtils::build_orchestrator(context, false)?;
    orchestrator.connect_engine().await?;

    let report = orchestrator.backup_services().await?;
    if report.succeeded.is_empty() && report.failures.is_empty() {
        HandlerUtils::print_info("No service has backups enabled");
        return Ok(());
    }
    print_operation_report(&report);
    report.into_result()?;
    Ok(())
}

fn print_start_report(report: &StartReport) {
    info!("Schedule: {:?}", report.batches);
    let rows: Vec<Vec<String>> = report
        .batches
        .iter()
        .enumerate()
        .flat_map(|(index, batch)| {
            batch.iter().map(move |name| {
                let outcome = report
                    .outcome(name)
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "not run".to_string());
                vec![(index + 1).to_string(), name.clone(), outcome]
            })
        })
        .collect();
    print!(
        "{}",
        HandlerUtils::format_table(&["BATCH", "SERVICE", "OUTCOME"], &rows)
    );
}

fn print_operation_report(report: &OperationReport) {
    for name in &report.succeeded {
        HandlerUtils::print_success(&format!("{}: {}", report.operation, name));
    }
    for (name, reason) in &report.failures {
        HandlerUtils::print_error(&format!("{} {}: {}", report.operation, name, reason));
    }
}
