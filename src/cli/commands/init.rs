//! Initialize command.

use console::style;

use crate::config::Settings;

/// Initialize the data directory and database.
pub fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let ctx = settings.create_db_context();
    ctx.init_schema()?;

    println!(
        "{} Initialized leadsource in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    println!(
        "  Add an automation with: leads config add --tenant <t> --user <u> --query <q> --criteria <c>"
    );

    Ok(())
}
