use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod blocks;
mod conflicts;
mod jobs;
mod regen;
mod validate;

/// Medrota CLI - Operator tool for the residency scheduling core
#[derive(Parser)]
#[command(name = "medrota")]
#[command(about = "Medrota operator CLI", long_about = None)]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, env = "MEDROTA_DB", default_value = "medrota.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Regenerate assignments for one academic block
    BlockRegenerate {
        /// Academic block number (1-13)
        #[arg(long)]
        block: u32,
        /// Academic year (the year the cycle starts in)
        #[arg(long)]
        year: i32,
        /// Clear existing assignments in the block first
        #[arg(long)]
        clear: bool,
        /// Solver wall-clock budget in seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,
        /// Produce a draft without committing assignments
        #[arg(long)]
        draft: bool,
        /// Rotation template to schedule
        #[arg(long, default_value = "clinic")]
        template: String,
    },
    /// Validate the persisted schedule against ACGME rules
    Validate {
        /// Range start (YYYY-MM-DD)
        #[arg(long)]
        start: chrono::NaiveDate,
        /// Range end (YYYY-MM-DD)
        #[arg(long)]
        end: chrono::NaiveDate,
    },
    /// Analyze schedule conflicts
    Conflicts {
        #[arg(long)]
        start: chrono::NaiveDate,
        #[arg(long)]
        end: chrono::NaiveDate,
        /// Restrict to conflicts affecting one person
        #[arg(long)]
        person: Option<uuid::Uuid>,
        /// Print per-day timeline data
        #[arg(long)]
        timeline: bool,
    },
    /// Administer background jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// List all jobs with trigger and run state
    List,
    /// Disable a job
    Pause { id: uuid::Uuid },
    /// Re-enable a job
    Resume { id: uuid::Uuid },
    /// Delete a job and its execution history
    Remove { id: uuid::Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let pool = medrota_storage::create_pool(&cli.db).await?;
    medrota_storage::run_migrations(&pool).await?;

    match cli.command {
        Commands::BlockRegenerate {
            block,
            year,
            clear,
            timeout,
            draft,
            template,
        } => {
            regen::run(
                pool,
                regen::RegenArgs {
                    block,
                    year,
                    clear,
                    timeout_secs: timeout,
                    draft,
                    template,
                },
            )
            .await
        }
        Commands::Validate { start, end } => validate::run(pool, start, end).await,
        Commands::Conflicts {
            start,
            end,
            person,
            timeline,
        } => conflicts::run(pool, start, end, person, timeline).await,
        Commands::Jobs { command } => jobs::run(pool, command).await,
    }
}
