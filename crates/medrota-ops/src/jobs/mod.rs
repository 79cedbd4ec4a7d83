/// Persistent background jobs: cron/interval/one-shot triggers, execution
/// history, misfire reconciliation, and overlap caps.
pub mod scheduler;
pub mod store;
pub mod triggers;

pub use scheduler::{JobRegistry, JobScheduler, SchedulerConfig, SyncCounts};
pub use store::{new_execution, success_rate, JobStore, MemoryJobStore};
pub use triggers::TriggerSpec;
