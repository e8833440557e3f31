//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific
//! modules.

mod config_cmd;
mod init;
mod review;
mod run_cmd;
mod status;
mod suggest;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "leads")]
#[command(about = "Autonomous lead sourcing engine")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides ./leadsource.toml discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides config file and LEADSOURCE_DATA_DIR)
    #[arg(short = 'd', long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Start the scheduler and run automations until interrupted
    Run,

    /// Execute a single run for one automation config
    Once {
        /// Automation config ID
        config_id: String,
    },

    /// Show configs, recent runs, and analytics
    Status {
        /// Limit output to one tenant
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// Manage automation configs
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Review query suggestions from the self-healer
    Suggest {
        #[command(subcommand)]
        command: SuggestCommands,
    },

    /// Review pending proposals
    Review {
        #[command(subcommand)]
        command: ReviewCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Add a new automation config
    Add {
        /// Tenant the automation belongs to
        #[arg(long)]
        tenant: String,
        /// User the automation runs for
        #[arg(long)]
        user: String,
        /// Search query
        #[arg(long)]
        query: String,
        /// Evaluation criteria handed to the model
        #[arg(long)]
        criteria: String,
        /// Minutes between runs
        #[arg(long, default_value = "60")]
        interval_minutes: i64,
        /// Pending + approved proposal count to stop at
        #[arg(long, default_value = "25")]
        target: i64,
        /// Disable (instead of pause) when the target is reached
        #[arg(long)]
        disable_on_target: bool,
        /// Location filter
        #[arg(long)]
        location: Option<String>,
        /// Only consider listings posted within this many days
        #[arg(long)]
        posted_within_days: Option<i64>,
        /// Profile term to append to the query (repeatable)
        #[arg(long = "term")]
        terms: Vec<String>,
        /// CRM record to personalize around
        #[arg(long)]
        target_record: Option<String>,
    },
    /// List automation configs
    List {
        #[arg(short, long)]
        tenant: Option<String>,
    },
    /// Enable a config
    Enable { config_id: String },
    /// Disable a config
    Disable { config_id: String },
}

#[derive(Subcommand)]
enum SuggestCommands {
    /// List configs with a pending suggestion
    List {
        #[arg(short, long)]
        tenant: Option<String>,
    },
    /// Accept the pending suggestion as the active query
    Accept { config_id: String },
    /// Discard the pending suggestion
    Reject { config_id: String },
}

#[derive(Subcommand)]
enum ReviewCommands {
    /// List pending proposals for a tenant
    List { tenant: String },
    /// Approve a proposal and materialize its record
    Approve { proposal_id: String },
    /// Reject a proposal
    Reject { proposal_id: String },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        settings.data_dir = data_dir;
    }

    match cli.command {
        Commands::Init => init::cmd_init(&settings),
        Commands::Run => run_cmd::cmd_run(&settings).await,
        Commands::Once { config_id } => run_cmd::cmd_once(&settings, &config_id).await,
        Commands::Status { tenant } => status::cmd_status(&settings, tenant.as_deref()),
        Commands::Config { command } => match command {
            ConfigCommands::Add {
                tenant,
                user,
                query,
                criteria,
                interval_minutes,
                target,
                disable_on_target,
                location,
                posted_within_days,
                terms,
                target_record,
            } => config_cmd::cmd_config_add(
                &settings,
                config_cmd::AddArgs {
                    tenant,
                    user,
                    query,
                    criteria,
                    interval_minutes,
                    target,
                    disable_on_target,
                    location,
                    posted_within_days,
                    terms,
                    target_record,
                },
            ),
            ConfigCommands::List { tenant } => {
                config_cmd::cmd_config_list(&settings, tenant.as_deref())
            }
            ConfigCommands::Enable { config_id } => {
                config_cmd::cmd_config_set_enabled(&settings, &config_id, true)
            }
            ConfigCommands::Disable { config_id } => {
                config_cmd::cmd_config_set_enabled(&settings, &config_id, false)
            }
        },
        Commands::Suggest { command } => match command {
            SuggestCommands::List { tenant } => {
                suggest::cmd_suggest_list(&settings, tenant.as_deref())
            }
            SuggestCommands::Accept { config_id } => {
                suggest::cmd_suggest_accept(&settings, &config_id)
            }
            SuggestCommands::Reject { config_id } => {
                suggest::cmd_suggest_reject(&settings, &config_id)
            }
        },
        Commands::Review { command } => match command {
            ReviewCommands::List { tenant } => review::cmd_review_list(&settings, &tenant),
            ReviewCommands::Approve { proposal_id } => {
                review::cmd_review_decide(&settings, &proposal_id, true)
            }
            ReviewCommands::Reject { proposal_id } => {
                review::cmd_review_decide(&settings, &proposal_id, false)
            }
        },
    }
}
