//! KV-backed solver checkpoint store.
//!
//! Checkpoints live under `solver:checkpoint:{run_id}` with a 24-hour TTL
//! refreshed on each save, alongside a bounded history of recent hashes
//! for debugging. Loads recompute the content hash; a mismatch is treated
//! as corruption and the artifact is discarded.

use async_trait::async_trait;
use medrota_core::ports::CheckpointStore;
use medrota_core::solver::SolverCheckpoint;
use std::sync::Arc;
use std::time::Duration;

use crate::kv::KvStore;

const CHECKPOINT_KEY_PREFIX: &str = "solver:checkpoint:";
const HISTORY_KEY_PREFIX: &str = "solver:checkpoint:history:";
const CHECKPOINT_TTL: Duration = Duration::from_secs(86_400);
const MAX_HISTORY: usize = 10;

pub struct KvCheckpointStore {
    kv: Arc<dyn KvStore>,
}

impl KvCheckpointStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn checkpoint_key(run_id: &str) -> String {
        format!("{}{}", CHECKPOINT_KEY_PREFIX, run_id)
    }

    fn history_key(run_id: &str) -> String {
        format!("{}{}", HISTORY_KEY_PREFIX, run_id)
    }
}

#[async_trait]
impl CheckpointStore for KvCheckpointStore {
    async fn save(&self, checkpoint: &SolverCheckpoint) -> anyhow::Result<()> {
        let key = Self::checkpoint_key(&checkpoint.run_id);
        let value = serde_json::to_string(checkpoint)?;
        self.kv.set_ex(&key, &value, CHECKPOINT_TTL).await?;

        // Bounded hash history, newest first.
        let history_key = Self::history_key(&checkpoint.run_id);
        let mut history = self.history(&checkpoint.run_id).await?;
        history.insert(0, checkpoint.hash.clone());
        history.truncate(MAX_HISTORY);
        self.kv
            .set_ex(&history_key, &serde_json::to_string(&history)?, CHECKPOINT_TTL)
            .await?;

        tracing::debug!(
            run_id = %checkpoint.run_id,
            iteration = checkpoint.iteration,
            hash = %checkpoint.hash,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn load(&self, run_id: &str) -> anyhow::Result<Option<SolverCheckpoint>> {
        let Some(raw) = self.kv.get(&Self::checkpoint_key(run_id)).await? else {
            return Ok(None);
        };
        let checkpoint: SolverCheckpoint = match serde_json::from_str(&raw) {
            Ok(c) => c,
            Err(err) => {
                tracing::warn!(run_id, error = %err, "discarding undecodable checkpoint");
                self.delete(run_id).await?;
                return Ok(None);
            }
        };
        if !checkpoint.verify_integrity() {
            // Corruption: discard and proceed as if absent.
            self.delete(run_id).await?;
            return Ok(None);
        }
        Ok(Some(checkpoint))
    }

    async fn delete(&self, run_id: &str) -> anyhow::Result<()> {
        self.kv.delete(&Self::checkpoint_key(run_id)).await?;
        self.kv.delete(&Self::history_key(run_id)).await?;
        Ok(())
    }

    async fn history(&self, run_id: &str) -> anyhow::Result<Vec<String>> {
        let Some(raw) = self.kv.get(&Self::history_key(run_id)).await? else {
            return Ok(Vec::new());
        };
        Ok(serde_json::from_str(&raw).unwrap_or_default())
    }
}
