//! Persistence port for job definitions and execution history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medrota_core::domain::{JobExecution, JobOutcome, ScheduledJob};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &ScheduledJob) -> anyhow::Result<()>;

    async fn update_job(&self, job: &ScheduledJob) -> anyhow::Result<()>;

    async fn delete_job(&self, job_id: Uuid) -> anyhow::Result<bool>;

    async fn job(&self, job_id: Uuid) -> anyhow::Result<Option<ScheduledJob>>;

    async fn jobs(&self, enabled_only: bool) -> anyhow::Result<Vec<ScheduledJob>>;

    /// Insert an execution row (typically with a `Running` outcome).
    async fn record_execution(&self, execution: &JobExecution) -> anyhow::Result<()>;

    /// Update an execution row in place (outcome, finish time).
    async fn update_execution(&self, execution: &JobExecution) -> anyhow::Result<()>;

    /// Most recent executions of one job, newest first.
    async fn executions_for(
        &self,
        job_id: Uuid,
        limit: u32,
    ) -> anyhow::Result<Vec<JobExecution>>;

    /// Most recent failed executions across all jobs, newest first.
    async fn recent_failures(&self, limit: u32) -> anyhow::Result<Vec<JobExecution>>;
}

/// Success rate over the recorded history of one job.
pub async fn success_rate(store: &dyn JobStore, job_id: Uuid) -> anyhow::Result<Option<f64>> {
    let executions = store.executions_for(job_id, 1000).await?;
    let finished: Vec<&JobExecution> = executions
        .iter()
        .filter(|e| !matches!(e.outcome, JobOutcome::Running))
        .collect();
    if finished.is_empty() {
        return Ok(None);
    }
    let succeeded = finished
        .iter()
        .filter(|e| matches!(e.outcome, JobOutcome::Success(_)))
        .count();
    Ok(Some(succeeded as f64 / finished.len() as f64))
}

/// In-process job store for tests and single-node setups.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, ScheduledJob>>,
    executions: RwLock<Vec<JobExecution>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_job(&self, job: &ScheduledJob) -> anyhow::Result<()> {
        self.jobs.write().insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &ScheduledJob) -> anyhow::Result<()> {
        self.jobs.write().insert(job.id, job.clone());
        Ok(())
    }

    async fn delete_job(&self, job_id: Uuid) -> anyhow::Result<bool> {
        Ok(self.jobs.write().remove(&job_id).is_some())
    }

    async fn job(&self, job_id: Uuid) -> anyhow::Result<Option<ScheduledJob>> {
        Ok(self.jobs.read().get(&job_id).cloned())
    }

    async fn jobs(&self, enabled_only: bool) -> anyhow::Result<Vec<ScheduledJob>> {
        let mut jobs: Vec<ScheduledJob> = self
            .jobs
            .read()
            .values()
            .filter(|j| !enabled_only || j.enabled)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(jobs)
    }

    async fn record_execution(&self, execution: &JobExecution) -> anyhow::Result<()> {
        self.executions.write().push(execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &JobExecution) -> anyhow::Result<()> {
        let mut executions = self.executions.write();
        if let Some(existing) = executions.iter_mut().find(|e| e.id == execution.id) {
            *existing = execution.clone();
        } else {
            executions.push(execution.clone());
        }
        Ok(())
    }

    async fn executions_for(
        &self,
        job_id: Uuid,
        limit: u32,
    ) -> anyhow::Result<Vec<JobExecution>> {
        let mut list: Vec<JobExecution> = self
            .executions
            .read()
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        list.truncate(limit as usize);
        Ok(list)
    }

    async fn recent_failures(&self, limit: u32) -> anyhow::Result<Vec<JobExecution>> {
        let mut list: Vec<JobExecution> = self
            .executions
            .read()
            .iter()
            .filter(|e| matches!(e.outcome, JobOutcome::Failure(_)))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        list.truncate(limit as usize);
        Ok(list)
    }
}

/// Convenience constructor for a new execution row.
pub fn new_execution(job_id: Uuid, scheduled_for: DateTime<Utc>) -> JobExecution {
    JobExecution {
        id: Uuid::new_v4(),
        job_id,
        scheduled_for,
        started_at: Utc::now(),
        finished_at: None,
        outcome: JobOutcome::Running,
        retry_count: 0,
    }
}
