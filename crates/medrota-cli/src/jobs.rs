//! Job administration against the persistent job store.
//!
//! The CLI flips state in the store; running schedulers pick changes up on
//! their next store sync.

use crate::JobCommands;
use anyhow::Result;
use medrota_ops::jobs::JobStore;
use medrota_storage::SqliteJobStore;
use sqlx::SqlitePool;
use uuid::Uuid;

pub async fn run(pool: SqlitePool, command: JobCommands) -> Result<()> {
    let store = SqliteJobStore::new(pool);
    match command {
        JobCommands::List => list(&store).await,
        JobCommands::Pause { id } => set_enabled(&store, id, false).await,
        JobCommands::Resume { id } => set_enabled(&store, id, true).await,
        JobCommands::Remove { id } => {
            if store.delete_job(id).await? {
                println!("removed {}", id);
            } else {
                println!("no job with id {}", id);
            }
            Ok(())
        }
    }
}

async fn list(store: &SqliteJobStore) -> Result<()> {
    let jobs = store.jobs(false).await?;
    if jobs.is_empty() {
        println!("no jobs");
        return Ok(());
    }
    for job in jobs {
        println!(
            "{}  {}  kind={}  enabled={}  runs={}  next={}",
            job.id,
            job.name,
            job.job_kind,
            job.enabled,
            job.run_count,
            job.next_run_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

async fn set_enabled(store: &SqliteJobStore, id: Uuid, enabled: bool) -> Result<()> {
    let Some(mut job) = store.job(id).await? else {
        println!("no job with id {}", id);
        return Ok(());
    };
    job.enabled = enabled;
    store.update_job(&job).await?;
    println!(
        "{} {}",
        if enabled { "resumed" } else { "paused" },
        job.name
    );
    Ok(())
}
