use anyhow::Result;
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use navtrack::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for navtrack::AppCommand {
    fn from(cmd: Commands) -> navtrack::AppCommand {
        match cmd {
            Commands::Sync => navtrack::AppCommand::Sync,
            Commands::Returns => navtrack::AppCommand::Returns,
            Commands::Value {
                client,
                date,
                dry_run,
            } => navtrack::AppCommand::Value {
                client,
                date,
                dry_run,
            },
            Commands::UpdateAll { date } => navtrack::AppCommand::UpdateAll { date },
            Commands::Backfill { client, days } => navtrack::AppCommand::Backfill { client, days },
            Commands::Verify { client } => navtrack::AppCommand::Verify { client },
            Commands::History {
                client,
                start,
                end,
                monthly,
            } => navtrack::AppCommand::History {
                client,
                start,
                end,
                monthly,
            },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Download the latest NAVs, sync history and write the returns report
    Sync,
    /// Recompute the returns report from stored NAV history
    Returns,
    /// Value a client's portfolio and store the snapshot
    Value {
        /// Client code as used in the ledger
        #[arg(long)]
        client: String,
        /// Valuation date (YYYY-MM-DD), defaults to the latest NAV date
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Compute and display without storing
        #[arg(long)]
        dry_run: bool,
    },
    /// Value every client in the ledger
    UpdateAll {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Value a client on every NAV date since their first transaction
    Backfill {
        #[arg(long)]
        client: String,
        /// Only backfill this many days before the latest NAV date
        #[arg(long)]
        days: Option<u32>,
    },
    /// Compare ledger units against the recorded holdings
    Verify {
        #[arg(long)]
        client: String,
    },
    /// Show stored valuations for a client
    History {
        #[arg(long)]
        client: String,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Summarize by calendar month
        #[arg(long)]
        monthly: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => navtrack::cli::setup::setup_at_path(path),
            None => navtrack::cli::setup::setup(),
        },
        Some(cmd) => navtrack::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
