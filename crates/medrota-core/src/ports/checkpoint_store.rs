use crate::solver::SolverCheckpoint;
use async_trait::async_trait;

/// Durable store for in-progress solver state.
///
/// Implementations verify the checkpoint content hash on load and treat a
/// mismatch as corruption: the artifact is discarded and `load` returns
/// `None`, never an error.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Save (overwrite) the checkpoint for its run id
    async fn save(&self, checkpoint: &SolverCheckpoint) -> anyhow::Result<()>;

    /// Load the latest checkpoint for a run, if present and intact
    async fn load(&self, run_id: &str) -> anyhow::Result<Option<SolverCheckpoint>>;

    /// Delete the checkpoint and its history for a run
    async fn delete(&self, run_id: &str) -> anyhow::Result<()>;

    /// Hashes of recent checkpoints for a run, newest first (debugging aid)
    async fn history(&self, run_id: &str) -> anyhow::Result<Vec<String>>;
}
