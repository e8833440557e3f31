//! Suggestion review commands, the explicit human acceptance surface for
//! self-healer output.

use console::style;

use crate::config::Settings;

pub fn cmd_suggest_list(settings: &Settings, tenant: Option<&str>) -> anyhow::Result<()> {
    let ctx = settings.create_db_context();
    ctx.init_schema()?;
    let configs = ctx.automations().list(tenant)?;

    let mut any = false;
    for config in configs {
        if let Some(suggestion) = &config.suggested_query {
            any = true;
            println!("{}  {}/{}", config.id, config.tenant_id, config.user_id);
            println!("    current:   {}", config.query);
            println!("    suggested: {}", style(suggestion).cyan());
        }
    }
    if !any {
        println!("{} No pending suggestions", style("!").yellow());
    }
    Ok(())
}

pub fn cmd_suggest_accept(settings: &Settings, config_id: &str) -> anyhow::Result<()> {
    let ctx = settings.create_db_context();
    ctx.init_schema()?;
    if ctx.automations().accept_suggestion(config_id)? {
        let config = ctx.automations().require(config_id)?;
        println!(
            "{} Active query replaced: {}",
            style("✓").green(),
            config.query
        );
    } else {
        println!("{} No pending suggestion for {}", style("!").yellow(), config_id);
    }
    Ok(())
}

pub fn cmd_suggest_reject(settings: &Settings, config_id: &str) -> anyhow::Result<()> {
    let ctx = settings.create_db_context();
    ctx.init_schema()?;
    if ctx.automations().reject_suggestion(config_id)? {
        println!("{} Suggestion discarded", style("✓").green());
    } else {
        println!("{} No pending suggestion for {}", style("!").yellow(), config_id);
    }
    Ok(())
}
