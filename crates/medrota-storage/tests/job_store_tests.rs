//! Integration tests for the SQLite job store.

use chrono::Utc;
use medrota_core::domain::{JobExecution, JobOutcome, ScheduledJob};
use medrota_ops::jobs::{success_rate, JobStore};
use medrota_storage::{create_pool, run_migrations, SqliteJobStore};
use uuid::Uuid;

async fn store() -> (SqliteJobStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let pool = create_pool(&dir.path().join("jobs.db")).await.unwrap();
    run_migrations(&pool).await.unwrap();
    (SqliteJobStore::new(pool), dir)
}

fn job(name: &str) -> ScheduledJob {
    ScheduledJob {
        id: Uuid::new_v4(),
        name: name.to_string(),
        job_kind: "sync_roster".to_string(),
        trigger: serde_json::json!({"kind": "interval", "config": {"seconds": 300}}),
        enabled: true,
        run_count: 0,
        last_run_at: None,
        next_run_at: Some(Utc::now()),
    }
}

fn execution(job_id: Uuid, outcome: JobOutcome) -> JobExecution {
    JobExecution {
        id: Uuid::new_v4(),
        job_id,
        scheduled_for: Utc::now(),
        started_at: Utc::now(),
        finished_at: Some(Utc::now()),
        outcome,
        retry_count: 0,
    }
}

#[tokio::test]
async fn test_job_round_trip_and_enabled_filter() {
    let (store, _dir) = store().await;
    let enabled = job("enabled");
    let mut disabled = job("disabled");
    disabled.enabled = false;
    store.insert_job(&enabled).await.unwrap();
    store.insert_job(&disabled).await.unwrap();

    let all = store.jobs(false).await.unwrap();
    assert_eq!(all.len(), 2);
    let only_enabled = store.jobs(true).await.unwrap();
    assert_eq!(only_enabled.len(), 1);
    assert_eq!(only_enabled[0].name, "enabled");

    // Trigger config survives the round trip unchanged.
    let loaded = store.job(enabled.id).await.unwrap().unwrap();
    assert_eq!(loaded.trigger, enabled.trigger);
}

#[tokio::test]
async fn test_update_flips_enabled_flag() {
    let (store, _dir) = store().await;
    let mut j = job("pausable");
    store.insert_job(&j).await.unwrap();

    j.enabled = false;
    store.update_job(&j).await.unwrap();
    assert!(!store.job(j.id).await.unwrap().unwrap().enabled);

    j.enabled = true;
    j.run_count = 7;
    store.update_job(&j).await.unwrap();
    let loaded = store.job(j.id).await.unwrap().unwrap();
    assert!(loaded.enabled);
    assert_eq!(loaded.run_count, 7);
}

#[tokio::test]
async fn test_delete_then_list_no_longer_contains() {
    let (store, _dir) = store().await;
    let j = job("temp");
    store.insert_job(&j).await.unwrap();
    assert!(store.delete_job(j.id).await.unwrap());
    assert!(!store.delete_job(j.id).await.unwrap());
    assert!(store.jobs(false).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_execution_envelope_updates_in_place() {
    let (store, _dir) = store().await;
    let j = job("worker");
    store.insert_job(&j).await.unwrap();

    let mut exec = execution(j.id, JobOutcome::Running);
    exec.finished_at = None;
    store.record_execution(&exec).await.unwrap();

    exec.finished_at = Some(Utc::now());
    exec.outcome = JobOutcome::Success("synced 14 rows".to_string());
    store.update_execution(&exec).await.unwrap();

    let history = store.executions_for(j.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0].outcome,
        JobOutcome::Success("synced 14 rows".to_string())
    );
    assert!(history[0].finished_at.is_some());
}

#[tokio::test]
async fn test_recent_failures_and_success_rate() {
    let (store, _dir) = store().await;
    let j = job("flaky");
    store.insert_job(&j).await.unwrap();

    store
        .record_execution(&execution(j.id, JobOutcome::Success("ok".to_string())))
        .await
        .unwrap();
    store
        .record_execution(&execution(j.id, JobOutcome::Failure("timeout".to_string())))
        .await
        .unwrap();
    store
        .record_execution(&execution(j.id, JobOutcome::Success("ok".to_string())))
        .await
        .unwrap();

    let failures = store.recent_failures(10).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].job_id, j.id);

    let rate = success_rate(&store, j.id).await.unwrap();
    assert_eq!(rate, Some(2.0 / 3.0));
}

#[tokio::test]
async fn test_cascade_removes_executions_with_job() {
    let (store, _dir) = store().await;
    let j = job("doomed");
    store.insert_job(&j).await.unwrap();
    store
        .record_execution(&execution(j.id, JobOutcome::Success("ok".to_string())))
        .await
        .unwrap();

    store.delete_job(j.id).await.unwrap();
    assert!(store.executions_for(j.id, 10).await.unwrap().is_empty());
}
