//! Scheduler daemon and single-run commands.

use std::sync::Arc;

use console::style;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::models::RunStatus;
use crate::scheduler::Scheduler;

/// Start the scheduler loop until Ctrl-C.
pub async fn cmd_run(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let ctx = settings.create_db_context();
    ctx.init_schema()?;

    let service = Arc::new(settings.create_service(ctx.clone()));
    let scheduler = Scheduler::new(ctx, service, settings.scheduler.clone());

    let shutdown = scheduler.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nShutting down, waiting for in-flight runs...");
            shutdown.cancel();
        }
    });

    scheduler.run().await;
    Ok(())
}

/// Execute one run for a single config, outside the scheduler.
pub async fn cmd_once(settings: &Settings, config_id: &str) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let ctx = settings.create_db_context();
    ctx.init_schema()?;

    let config = ctx.automations().require(config_id)?;
    let service = settings.create_service(ctx);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let report = service.execute_run(&config, &cancel).await?;

    let marker = match report.status {
        RunStatus::Completed => style("✓").green(),
        _ => style("✗").red(),
    };
    println!(
        "{} Run {} {}: {} prospects, {} duplicates, {} proposals",
        marker,
        report.run_id,
        report.status.as_str(),
        report.prospects_found,
        report.duplicates,
        report.proposals_created
    );
    if let Some(error) = report.error {
        println!("  {} {}", style("error:").red(), error);
    }
    if let Some(suggestion) = report.suggestion {
        println!(
            "  {} suggested replacement query: {}",
            style("→").cyan(),
            suggestion
        );
        println!("    Accept with: leads suggest accept {config_id}");
    }

    Ok(())
}
