//! Background job scheduler with store-persisted state.
//!
//! Jobs load from the [`JobStore`] on start; a tick loop fires due
//! triggers, records an execution row around every run, reconciles missed
//! runs against the misfire grace, and caps overlapping executions per
//! job.

use crate::error::OpsError;
use crate::jobs::store::{new_execution, JobStore};
use crate::jobs::triggers::TriggerSpec;
use crate::metrics::OpsMetrics;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::BoxFuture;
use medrota_core::domain::{JobOutcome, ScheduledJob};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// A registered job function: takes no input, returns a result summary.
pub type JobFn = dyn Fn() -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync;

/// Named job functions the scheduler can invoke. Job rows reference
/// functions by name so definitions survive restarts.
#[derive(Default)]
pub struct JobRegistry {
    functions: HashMap<String, Arc<JobFn>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, name: &str, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        self.functions
            .insert(name.to_string(), Arc::new(move || Box::pin(f())));
    }

    pub fn get(&self, name: &str) -> Option<Arc<JobFn>> {
        self.functions.get(name).cloned()
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How late a firing may start and still run (coalesced).
    pub misfire_grace: Duration,
    /// Max overlapping executions of the same job.
    pub max_instances: usize,
    /// Tick cadence of the scheduler loop.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            misfire_grace: Duration::from_secs(300),
            max_instances: 1,
            tick_interval: Duration::from_millis(500),
        }
    }
}

struct InstalledJob {
    job: ScheduledJob,
    trigger: TriggerSpec,
    next_run: Option<DateTime<Utc>>,
    running: usize,
}

struct Inner {
    store: Arc<dyn JobStore>,
    registry: JobRegistry,
    config: SchedulerConfig,
    metrics: Arc<OpsMetrics>,
    installed: Mutex<HashMap<Uuid, InstalledJob>>,
}

pub struct JobScheduler {
    inner: Arc<Inner>,
    loop_handle: Mutex<Option<(watch::Sender<bool>, tokio::task::JoinHandle<()>)>>,
}

/// Result of a store synchronization pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncCounts {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
}

impl JobScheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: JobRegistry,
        config: SchedulerConfig,
        metrics: Arc<OpsMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                registry,
                config,
                metrics,
                installed: Mutex::new(HashMap::new()),
            }),
            loop_handle: Mutex::new(None),
        }
    }

    /// Load enabled jobs from the store and start the tick loop.
    pub async fn start(&self) -> anyhow::Result<usize> {
        let loaded = self.load_jobs().await?;
        tracing::info!(loaded, "job scheduler started");

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.tick_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Inner::run_pending(&inner, Utc::now());
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        *self.loop_handle.lock() = Some((shutdown_tx, task));
        Ok(loaded)
    }

    /// Stop the tick loop. In-flight executions run to completion.
    pub async fn stop(&self) {
        let handle = self.loop_handle.lock().take();
        if let Some((shutdown, task)) = handle {
            let _ = shutdown.send(true);
            let _ = task.await;
            tracing::info!("job scheduler stopped");
        }
    }

    /// Persist and install a new job. Returns its id.
    pub async fn add_job(
        &self,
        name: &str,
        job_kind: &str,
        trigger: TriggerSpec,
    ) -> anyhow::Result<Uuid> {
        trigger.validate()?;
        if self.inner.registry.get(job_kind).is_none() {
            return Err(OpsError::UnknownJobKind(job_kind.to_string()).into());
        }

        let now = Utc::now();
        let next_run = trigger.next_fire_after(now)?;
        let job = ScheduledJob {
            id: Uuid::new_v4(),
            name: name.to_string(),
            job_kind: job_kind.to_string(),
            trigger: serde_json::to_value(&trigger)?,
            enabled: true,
            run_count: 0,
            last_run_at: None,
            next_run_at: next_run,
        };
        self.inner.store.insert_job(&job).await?;
        self.install(job.clone(), trigger, next_run);
        Ok(job.id)
    }

    pub async fn remove_job(&self, job_id: Uuid) -> anyhow::Result<bool> {
        self.uninstall(job_id);
        self.inner.store.delete_job(job_id).await
    }

    pub async fn pause_job(&self, job_id: Uuid) -> anyhow::Result<bool> {
        let Some(mut job) = self.inner.store.job(job_id).await? else {
            return Ok(false);
        };
        job.enabled = false;
        self.inner.store.update_job(&job).await?;
        self.uninstall(job_id);
        Ok(true)
    }

    pub async fn resume_job(&self, job_id: Uuid) -> anyhow::Result<bool> {
        let Some(mut job) = self.inner.store.job(job_id).await? else {
            return Ok(false);
        };
        job.enabled = true;
        let trigger: TriggerSpec = serde_json::from_value(job.trigger.clone())?;
        let next_run = trigger.next_fire_after(Utc::now())?;
        job.next_run_at = next_run;
        self.inner.store.update_job(&job).await?;
        self.install(job, trigger, next_run);
        Ok(true)
    }

    pub async fn list_jobs(&self) -> anyhow::Result<Vec<ScheduledJob>> {
        self.inner.store.jobs(false).await
    }

    /// Reconcile installed jobs with the store: install new, drop deleted,
    /// refresh modified.
    pub async fn sync_with_store(&self) -> anyhow::Result<SyncCounts> {
        let store_jobs = self.inner.store.jobs(true).await?;
        let mut counts = SyncCounts::default();

        let installed_ids: Vec<Uuid> = self.inner.installed.lock().keys().copied().collect();
        let store_ids: std::collections::HashSet<Uuid> =
            store_jobs.iter().map(|j| j.id).collect();

        for id in installed_ids {
            if !store_ids.contains(&id) {
                self.uninstall(id);
                counts.removed += 1;
            }
        }

        for job in store_jobs {
            let trigger: TriggerSpec = match serde_json::from_value(job.trigger.clone()) {
                Ok(t) => t,
                Err(err) => {
                    tracing::error!(job = %job.name, error = %err, "skipping job with bad trigger");
                    continue;
                }
            };
            let status = {
                let installed = self.inner.installed.lock();
                installed
                    .get(&job.id)
                    .map(|entry| entry.job.trigger != job.trigger)
            };
            match status {
                None => {
                    let next_run = job
                        .next_run_at
                        .or_else(|| trigger.next_fire_after(Utc::now()).ok().flatten());
                    self.install(job, trigger, next_run);
                    counts.added += 1;
                }
                Some(trigger_changed) => {
                    let next_run = if trigger_changed {
                        trigger.next_fire_after(Utc::now()).ok().flatten()
                    } else {
                        None
                    };
                    let mut installed = self.inner.installed.lock();
                    if let Some(entry) = installed.get_mut(&job.id) {
                        if trigger_changed {
                            entry.trigger = trigger;
                            entry.next_run = next_run;
                            counts.updated += 1;
                        }
                        entry.job = job;
                    }
                }
            }
        }

        tracing::info!(
            added = counts.added,
            removed = counts.removed,
            updated = counts.updated,
            "scheduler store sync"
        );
        Ok(counts)
    }

    /// Fire everything due at `now`. Returns the number of executions
    /// started. The tick loop calls this with the wall clock; tests may
    /// drive it directly.
    pub fn run_pending_at(&self, now: DateTime<Utc>) -> usize {
        Inner::run_pending(&self.inner, now)
    }

    async fn load_jobs(&self) -> anyhow::Result<usize> {
        let jobs = self.inner.store.jobs(true).await?;
        let mut loaded = 0;
        let now = Utc::now();
        for job in jobs {
            let trigger: TriggerSpec = match serde_json::from_value(job.trigger.clone()) {
                Ok(t) => t,
                Err(err) => {
                    tracing::error!(job = %job.name, error = %err, "failed to load job");
                    continue;
                }
            };
            // Keep the persisted next-run so firings missed while the
            // scheduler was down go through misfire reconciliation.
            let next_run = match job.next_run_at {
                Some(at) => Some(at),
                None => trigger.next_fire_after(now)?,
            };
            self.install(job, trigger, next_run);
            loaded += 1;
        }
        Ok(loaded)
    }

    fn install(&self, job: ScheduledJob, trigger: TriggerSpec, next_run: Option<DateTime<Utc>>) {
        let mut installed = self.inner.installed.lock();
        installed.insert(
            job.id,
            InstalledJob {
                job,
                trigger,
                next_run,
                running: 0,
            },
        );
        self.inner.metrics.jobs_enabled.set(installed.len() as i64);
    }

    fn uninstall(&self, job_id: Uuid) {
        let mut installed = self.inner.installed.lock();
        installed.remove(&job_id);
        self.inner.metrics.jobs_enabled.set(installed.len() as i64);
    }
}

impl Inner {
    /// One scheduling pass: fire due jobs, reconcile misfires.
    fn run_pending(inner: &Arc<Inner>, now: DateTime<Utc>) -> usize {
        let grace = ChronoDuration::from_std(inner.config.misfire_grace)
            .unwrap_or_else(|_| ChronoDuration::seconds(300));
        let mut started = 0;

        let mut installed = inner.installed.lock();
        for entry in installed.values_mut() {
            let Some(due_at) = entry.next_run else {
                continue;
            };
            if due_at > now {
                continue;
            }

            // Advance past every missed firing; coalescing means at most
            // one run regardless of how many fell due.
            entry.next_run = entry.trigger.next_fire_after(now).ok().flatten();

            if now - due_at > grace {
                tracing::warn!(
                    job = %entry.job.name,
                    due_at = %due_at,
                    "missed run beyond misfire grace, skipping"
                );
                inner.metrics.job_missed.inc();
                continue;
            }

            if entry.running >= inner.config.max_instances {
                tracing::warn!(
                    job = %entry.job.name,
                    running = entry.running,
                    "max instances reached, dropping trigger"
                );
                inner.metrics.job_missed.inc();
                continue;
            }

            entry.running += 1;
            started += 1;
            Self::spawn_execution(inner.clone(), entry.job.clone(), due_at);
        }
        started
    }

    /// Run one job inside its execution envelope.
    fn spawn_execution(inner: Arc<Inner>, job: ScheduledJob, scheduled_for: DateTime<Utc>) {
        tokio::spawn(async move {
            let mut execution = new_execution(job.id, scheduled_for);
            if let Err(err) = inner.store.record_execution(&execution).await {
                tracing::error!(job = %job.name, error = %err, "failed to record execution");
            }

            let outcome = match inner.registry.get(&job.job_kind) {
                Some(f) => f().await,
                None => Err(OpsError::UnknownJobKind(job.job_kind.clone()).into()),
            };

            execution.finished_at = Some(Utc::now());
            match outcome {
                Ok(summary) => {
                    execution.outcome = JobOutcome::Success(summary);
                    inner.metrics.job_success.inc();
                }
                Err(err) => {
                    tracing::error!(job = %job.name, error = %err, "job execution failed");
                    execution.outcome = JobOutcome::Failure(format!("{:#}", err));
                    inner.metrics.job_failure.inc();
                }
            }
            if let Err(err) = inner.store.update_execution(&execution).await {
                tracing::error!(job = %job.name, error = %err, "failed to update execution");
            }

            // Refresh the persisted job row and release the overlap slot.
            let next_run = {
                let mut installed = inner.installed.lock();
                match installed.get_mut(&job.id) {
                    Some(entry) => {
                        entry.running = entry.running.saturating_sub(1);
                        entry.job.run_count += 1;
                        entry.job.last_run_at = Some(Utc::now());
                        entry.job.next_run_at = entry.next_run;
                        Some(entry.job.clone())
                    }
                    None => None,
                }
            };
            if let Some(updated) = next_run {
                if let Err(err) = inner.store.update_job(&updated).await {
                    tracing::error!(job = %updated.name, error = %err, "failed to persist job state");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::{success_rate, MemoryJobStore};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scheduler_with<F, Fut>(job_fn: F) -> (JobScheduler, Arc<MemoryJobStore>)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let store = Arc::new(MemoryJobStore::new());
        let mut registry = JobRegistry::new();
        registry.register("test_fn", job_fn);
        let scheduler = JobScheduler::new(
            store.clone(),
            registry,
            SchedulerConfig {
                misfire_grace: Duration::from_secs(300),
                max_instances: 1,
                tick_interval: Duration::from_millis(50),
            },
            Arc::new(OpsMetrics::new().unwrap()),
        );
        (scheduler, store)
    }

    async fn wait_for<F>(mut condition: F)
    where
        F: FnMut() -> bool,
    {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_add_list_pause_resume_remove_round_trip() {
        let (scheduler, _store) = scheduler_with(|| async { Ok("done".to_string()) });
        let trigger = TriggerSpec::Interval {
            seconds: 3600,
            start_at: None,
        };
        let id = scheduler
            .add_job("nightly", "test_fn", trigger.clone())
            .await
            .unwrap();

        let jobs = scheduler.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "nightly");
        assert_eq!(
            serde_json::from_value::<TriggerSpec>(jobs[0].trigger.clone()).unwrap(),
            trigger
        );
        assert!(jobs[0].enabled);

        assert!(scheduler.pause_job(id).await.unwrap());
        assert!(!scheduler.list_jobs().await.unwrap()[0].enabled);

        assert!(scheduler.resume_job(id).await.unwrap());
        assert!(scheduler.list_jobs().await.unwrap()[0].enabled);

        assert!(scheduler.remove_job(id).await.unwrap());
        assert!(scheduler.list_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job_kind_is_rejected() {
        let (scheduler, _store) = scheduler_with(|| async { Ok(String::new()) });
        let result = scheduler
            .add_job(
                "bad",
                "missing_fn",
                TriggerSpec::Interval {
                    seconds: 60,
                    start_at: None,
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_due_job_runs_and_records_execution() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let (scheduler, store) = scheduler_with(move || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok("ran".to_string())
            }
        });

        let id = scheduler
            .add_job(
                "soon",
                "test_fn",
                TriggerSpec::Date {
                    run_at: Utc::now() + ChronoDuration::milliseconds(10),
                },
            )
            .await
            .unwrap();

        // Fire slightly after the due instant.
        scheduler.run_pending_at(Utc::now() + ChronoDuration::seconds(1));
        wait_for(|| counter.load(Ordering::SeqCst) == 1).await;

        wait_for(|| {
            futures::executor::block_on(store.executions_for(id, 10))
                .map(|e| {
                    e.first()
                        .map_or(false, |x| matches!(x.outcome, JobOutcome::Success(_)))
                })
                .unwrap_or(false)
        })
        .await;

        let rate = success_rate(store.as_ref(), id).await.unwrap();
        assert_eq!(rate, Some(1.0));
    }

    #[tokio::test]
    async fn test_missed_run_beyond_grace_is_skipped() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let (scheduler, store) = scheduler_with(move || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(String::new())
            }
        });

        let id = scheduler
            .add_job(
                "stale",
                "test_fn",
                TriggerSpec::Date {
                    run_at: Utc::now() + ChronoDuration::seconds(1),
                },
            )
            .await
            .unwrap();

        // The scheduler "wakes up" far beyond the 300s grace.
        scheduler.run_pending_at(Utc::now() + ChronoDuration::seconds(3600));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0, "missed run must not fire");
        assert!(store.executions_for(id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_recorded_with_error() {
        let (scheduler, store) =
            scheduler_with(|| async { Err(anyhow::anyhow!("database exploded")) });
        let id = scheduler
            .add_job(
                "failing",
                "test_fn",
                TriggerSpec::Date {
                    run_at: Utc::now() + ChronoDuration::milliseconds(10),
                },
            )
            .await
            .unwrap();

        scheduler.run_pending_at(Utc::now() + ChronoDuration::seconds(1));
        wait_for(|| {
            futures::executor::block_on(store.recent_failures(10))
                .map(|f| !f.is_empty())
                .unwrap_or(false)
        })
        .await;

        let failures = store.recent_failures(10).await.unwrap();
        assert_eq!(failures[0].job_id, id);
        match &failures[0].outcome {
            JobOutcome::Failure(message) => assert!(message.contains("database exploded")),
            other => panic!("expected failure outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_max_instances_drops_overlapping_trigger() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let (scheduler, _store) = scheduler_with(move || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(String::new())
            }
        });

        scheduler
            .add_job(
                "slow",
                "test_fn",
                TriggerSpec::Interval {
                    seconds: 1,
                    start_at: None,
                },
            )
            .await
            .unwrap();

        let base = Utc::now() + ChronoDuration::seconds(2);
        assert_eq!(scheduler.run_pending_at(base), 1);
        wait_for(|| counter.load(Ordering::SeqCst) == 1).await;
        // Still running; the next due firing is dropped.
        assert_eq!(
            scheduler.run_pending_at(base + ChronoDuration::seconds(2)),
            0
        );
    }

    #[tokio::test]
    async fn test_scheduler_loop_start_stop() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let (scheduler, _store) = scheduler_with(move || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(String::new())
            }
        });

        scheduler
            .add_job(
                "instant",
                "test_fn",
                TriggerSpec::Date {
                    run_at: Utc::now() + ChronoDuration::milliseconds(20),
                },
            )
            .await
            .unwrap();

        scheduler.start().await.unwrap();
        wait_for(|| counter.load(Ordering::SeqCst) == 1).await;
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_sync_with_store_adds_and_removes() {
        let (scheduler, store) = scheduler_with(|| async { Ok(String::new()) });

        // A job appears in the store behind the scheduler's back.
        let foreign = ScheduledJob {
            id: Uuid::new_v4(),
            name: "external".to_string(),
            job_kind: "test_fn".to_string(),
            trigger: serde_json::to_value(TriggerSpec::Interval {
                seconds: 60,
                start_at: None,
            })
            .unwrap(),
            enabled: true,
            run_count: 0,
            last_run_at: None,
            next_run_at: None,
        };
        store.insert_job(&foreign).await.unwrap();

        let counts = scheduler.sync_with_store().await.unwrap();
        assert_eq!(counts.added, 1);

        store.delete_job(foreign.id).await.unwrap();
        let counts = scheduler.sync_with_store().await.unwrap();
        assert_eq!(counts.removed, 1);
    }
}
