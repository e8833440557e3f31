//! Automation config management commands.

use console::style;

use crate::config::Settings;
use crate::models::AutomationConfig;

pub struct AddArgs {
    pub tenant: String,
    pub user: String,
    pub query: String,
    pub criteria: String,
    pub interval_minutes: i64,
    pub target: i64,
    pub disable_on_target: bool,
    pub location: Option<String>,
    pub posted_within_days: Option<i64>,
    pub terms: Vec<String>,
    pub target_record: Option<String>,
}

pub fn cmd_config_add(settings: &Settings, args: AddArgs) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let ctx = settings.create_db_context();
    ctx.init_schema()?;

    let mut config = AutomationConfig::new(&args.tenant, &args.user, &args.query, &args.criteria)
        .with_interval_minutes(args.interval_minutes)
        .with_target(args.target, args.disable_on_target)
        .with_location(args.location)
        .with_profile_terms(args.terms);
    config.posted_within_days = args.posted_within_days;
    config.target_record_id = args.target_record;

    ctx.automations().save(&config)?;

    println!("{} Added automation {}", style("✓").green(), config.id);
    println!(
        "  every {} min, target {} ({})",
        config.interval_minutes,
        config.target_count,
        if config.disable_on_target {
            "disable on target"
        } else {
            "pause on target"
        }
    );
    Ok(())
}

pub fn cmd_config_list(settings: &Settings, tenant: Option<&str>) -> anyhow::Result<()> {
    let ctx = settings.create_db_context();
    ctx.init_schema()?;
    let configs = ctx.automations().list(tenant)?;

    if configs.is_empty() {
        println!("{} No automation configs", style("!").yellow());
        return Ok(());
    }

    for config in configs {
        let state = if config.enabled {
            style("enabled").green()
        } else {
            style("disabled").red()
        };
        println!("{}  [{}] {}/{}", config.id, state, config.tenant_id, config.user_id);
        println!("    query: {}", config.query);
        if let Some(suggestion) = &config.suggested_query {
            println!("    {} suggested: {}", style("→").cyan(), suggestion);
        }
        if let Some(next) = config.next_run_at {
            println!("    next run: {}", next.to_rfc3339());
        }
    }
    Ok(())
}

pub fn cmd_config_set_enabled(
    settings: &Settings,
    config_id: &str,
    enabled: bool,
) -> anyhow::Result<()> {
    let ctx = settings.create_db_context();
    ctx.init_schema()?;
    ctx.automations().set_enabled(config_id, enabled)?;
    println!(
        "{} Automation {} {}",
        style("✓").green(),
        config_id,
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}
