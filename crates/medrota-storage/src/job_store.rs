//! SQLite implementation of the job store port.

use crate::models::{outcome_columns, JobExecutionRow, JobRow};
use async_trait::async_trait;
use medrota_core::domain::{JobExecution, ScheduledJob};
use medrota_ops::jobs::JobStore;
use sqlx::{query, query_as, SqlitePool};
use uuid::Uuid;

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert_job(&self, job: &ScheduledJob) -> anyhow::Result<()> {
        query(
            "INSERT INTO scheduled_jobs
                (id, name, job_kind, trigger_spec, enabled, run_count, last_run_at, next_run_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(&job.name)
        .bind(&job.job_kind)
        .bind(serde_json::to_string(&job.trigger)?)
        .bind(job.enabled as i64)
        .bind(job.run_count)
        .bind(job.last_run_at.map(|t| t.timestamp_millis()))
        .bind(job.next_run_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_job(&self, job: &ScheduledJob) -> anyhow::Result<()> {
        query(
            "UPDATE scheduled_jobs SET
                name = ?, job_kind = ?, trigger_spec = ?, enabled = ?,
                run_count = ?, last_run_at = ?, next_run_at = ?
             WHERE id = ?",
        )
        .bind(&job.name)
        .bind(&job.job_kind)
        .bind(serde_json::to_string(&job.trigger)?)
        .bind(job.enabled as i64)
        .bind(job.run_count)
        .bind(job.last_run_at.map(|t| t.timestamp_millis()))
        .bind(job.next_run_at.map(|t| t.timestamp_millis()))
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_job(&self, job_id: Uuid) -> anyhow::Result<bool> {
        let result = query("DELETE FROM scheduled_jobs WHERE id = ?")
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn job(&self, job_id: Uuid) -> anyhow::Result<Option<ScheduledJob>> {
        let row = query_as::<_, JobRow>(
            "SELECT id, name, job_kind, trigger_spec, enabled, run_count, last_run_at, next_run_at
             FROM scheduled_jobs WHERE id = ?",
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.into_domain().map_err(Into::into)).transpose()
    }

    async fn jobs(&self, enabled_only: bool) -> anyhow::Result<Vec<ScheduledJob>> {
        let sql = if enabled_only {
            "SELECT id, name, job_kind, trigger_spec, enabled, run_count, last_run_at, next_run_at
             FROM scheduled_jobs WHERE enabled = 1 ORDER BY name"
        } else {
            "SELECT id, name, job_kind, trigger_spec, enabled, run_count, last_run_at, next_run_at
             FROM scheduled_jobs ORDER BY name"
        };
        let rows = query_as::<_, JobRow>(sql).fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|r| r.into_domain().map_err(Into::into))
            .collect()
    }

    async fn record_execution(&self, execution: &JobExecution) -> anyhow::Result<()> {
        let (status, detail) = outcome_columns(&execution.outcome);
        query(
            "INSERT INTO job_executions
                (id, job_id, scheduled_for, started_at, finished_at, status, detail, retry_count)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(execution.id.to_string())
        .bind(execution.job_id.to_string())
        .bind(execution.scheduled_for.timestamp_millis())
        .bind(execution.started_at.timestamp_millis())
        .bind(execution.finished_at.map(|t| t.timestamp_millis()))
        .bind(status)
        .bind(detail)
        .bind(execution.retry_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_execution(&self, execution: &JobExecution) -> anyhow::Result<()> {
        let (status, detail) = outcome_columns(&execution.outcome);
        query(
            "UPDATE job_executions SET
                finished_at = ?, status = ?, detail = ?, retry_count = ?
             WHERE id = ?",
        )
        .bind(execution.finished_at.map(|t| t.timestamp_millis()))
        .bind(status)
        .bind(detail)
        .bind(execution.retry_count as i64)
        .bind(execution.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn executions_for(
        &self,
        job_id: Uuid,
        limit: u32,
    ) -> anyhow::Result<Vec<JobExecution>> {
        let rows = query_as::<_, JobExecutionRow>(
            "SELECT id, job_id, scheduled_for, started_at, finished_at, status, detail, retry_count
             FROM job_executions WHERE job_id = ?
             ORDER BY started_at DESC LIMIT ?",
        )
        .bind(job_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| r.into_domain().map_err(Into::into))
            .collect()
    }

    async fn recent_failures(&self, limit: u32) -> anyhow::Result<Vec<JobExecution>> {
        let rows = query_as::<_, JobExecutionRow>(
            "SELECT id, job_id, scheduled_for, started_at, finished_at, status, detail, retry_count
             FROM job_executions WHERE status = 'failure'
             ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| r.into_domain().map_err(Into::into))
            .collect()
    }
}
