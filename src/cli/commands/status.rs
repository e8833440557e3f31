//! Status command.

use console::style;

use crate::analytics::AnalyticsEngine;
use crate::config::Settings;
use crate::models::{ProposalStatus, RunStatus};

pub fn cmd_status(settings: &Settings, tenant: Option<&str>) -> anyhow::Result<()> {
    let ctx = settings.create_db_context();
    ctx.init_schema()?;
    let engine = AnalyticsEngine::new(settings.analytics.clone());

    let configs = ctx.automations().list(tenant)?;
    if configs.is_empty() {
        println!("{} No automation configs", style("!").yellow());
        return Ok(());
    }

    for config in configs {
        let live = ctx.proposals().count_active(&config.tenant_id)?;
        let state = if !config.enabled {
            style("disabled").red()
        } else if !config.disable_on_target && live >= config.target_count {
            style("paused at target").yellow()
        } else {
            style("active").green()
        };

        println!(
            "{} {}/{} [{}]",
            style(&config.id).bold(),
            config.tenant_id,
            config.user_id,
            state
        );
        println!("  query: {}", config.query);
        println!("  proposals toward target: {}/{}", live, config.target_count);
        if let Some(suggestion) = &config.suggested_query {
            println!("  {} pending suggestion: {}", style("→").cyan(), suggestion);
        }

        let runs = ctx.run_logs().recent_for_config(&config.id, settings.analytics.window)?;
        if runs.is_empty() {
            println!("  no runs yet");
            println!();
            continue;
        }

        let titles = ctx.proposals().titles_with_status(&config.tenant_id)?;
        let mut approved = Vec::new();
        let mut rejected = ctx.proposals().rejection_titles(&config.tenant_id)?;
        for (title, status) in titles {
            match status {
                ProposalStatus::Rejected => rejected.push(title),
                _ => approved.push(title),
            }
        }
        let analytics = engine.compute(&runs, &approved, &rejected);

        for run in runs.iter().take(5) {
            let marker = match run.status {
                RunStatus::Completed => style("✓").green(),
                RunStatus::Failed => style("✗").red(),
                RunStatus::Running => style("…").cyan(),
            };
            println!(
                "  {} {}  {} prospects / {} dup / {} proposals",
                marker,
                run.started_at.format("%Y-%m-%d %H:%M"),
                run.prospects_found,
                run.duplicates,
                run.proposals_created
            );
        }

        println!(
            "  zero-run streak: {}, duplicate rate: {:.0}%{}",
            analytics.consecutive_zero_runs,
            analytics.recent_duplicate_rate * 100.0,
            if analytics.market_exhausted {
                " (market exhausted)"
            } else {
                ""
            }
        );
        if !analytics.untried_searches.is_empty() {
            println!("  untried searches: {}", analytics.untried_searches.join("; "));
        }
        println!();
    }
    Ok(())
}
