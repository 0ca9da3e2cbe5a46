pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{debug, info};

/// Commands that need a loaded configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    /// Refresh NAV history for the master list and rewrite the returns report.
    Sync,
    /// Recompute the returns report from stored NAVs.
    Returns,
    Value {
        client: String,
        date: Option<NaiveDate>,
        dry_run: bool,
    },
    UpdateAll {
        date: Option<NaiveDate>,
    },
    Backfill {
        client: String,
        days: Option<u32>,
    },
    Verify {
        client: String,
    },
    History {
        client: String,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        monthly: bool,
    },
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("navtrack starting...");

    let config = match config_path {
        Some(path) => crate::core::config::AppConfig::load_from_path(path)?,
        None => crate::core::config::AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    match command {
        AppCommand::Sync => cli::sync::run(&config).await,
        AppCommand::Returns => cli::returns::run(&config).await,
        AppCommand::Value {
            client,
            date,
            dry_run,
        } => cli::portfolio::value(&config, &client, date, dry_run).await,
        AppCommand::UpdateAll { date } => cli::portfolio::update_all(&config, date).await,
        AppCommand::Backfill { client, days } => {
            cli::portfolio::backfill(&config, &client, days).await
        }
        AppCommand::Verify { client } => cli::portfolio::verify(&config, &client).await,
        AppCommand::History {
            client,
            start,
            end,
            monthly,
        } => cli::portfolio::history(&config, &client, start, end, monthly).await,
    }
}
