use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Number of hex characters kept from the SHA-256 digest.
const HASH_LEN: usize = 16;

/// Immutable snapshot of solver state at a point in time.
///
/// The hash covers exactly `(run_id, iteration, sorted assignments, score)`
/// in canonical JSON form. Any field modification invalidates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverCheckpoint {
    pub run_id: String,
    pub iteration: u64,
    /// Assignment tuples `(person_id, block_id, template_id)`.
    pub assignments: Vec<(Uuid, Uuid, Option<Uuid>)>,
    pub score: f64,
    pub violations_count: u32,
    pub created_at: DateTime<Utc>,
    pub hash: String,
}

impl SolverCheckpoint {
    /// Build a checkpoint, computing the content hash.
    pub fn new(
        run_id: impl Into<String>,
        iteration: u64,
        assignments: Vec<(Uuid, Uuid, Option<Uuid>)>,
        score: f64,
        violations_count: u32,
    ) -> Self {
        let mut checkpoint = Self {
            run_id: run_id.into(),
            iteration,
            assignments,
            score,
            violations_count,
            created_at: Utc::now(),
            hash: String::new(),
        };
        checkpoint.hash = checkpoint.compute_hash();
        checkpoint
    }

    /// SHA-256 over the canonical serialization, truncated to 16 hex chars.
    pub fn compute_hash(&self) -> String {
        let mut sorted = self.assignments.clone();
        sorted.sort();

        #[derive(Serialize)]
        struct Canonical<'a> {
            run_id: &'a str,
            iteration: u64,
            assignments: &'a [(Uuid, Uuid, Option<Uuid>)],
            score: f64,
        }

        let canonical = Canonical {
            run_id: &self.run_id,
            iteration: self.iteration,
            assignments: &sorted,
            score: self.score,
        };

        // Field order in `Canonical` is fixed, so the JSON form is stable.
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        hex::encode(digest)[..HASH_LEN].to_string()
    }

    /// Verify checkpoint integrity by recomputing the hash.
    pub fn verify_integrity(&self) -> bool {
        let expected = self.compute_hash();
        let ok = self.hash == expected;
        if !ok {
            tracing::warn!(
                run_id = %self.run_id,
                expected,
                stored = %self.hash,
                "checkpoint integrity check failed"
            );
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SolverCheckpoint {
        SolverCheckpoint::new(
            "run-1",
            500,
            vec![
                (Uuid::new_v4(), Uuid::new_v4(), None),
                (Uuid::new_v4(), Uuid::new_v4(), Some(Uuid::new_v4())),
            ],
            42.5,
            1,
        )
    }

    #[test]
    fn test_hash_is_stable_under_assignment_order() {
        let checkpoint = sample();
        let mut reversed = checkpoint.clone();
        reversed.assignments.reverse();
        assert_eq!(checkpoint.compute_hash(), reversed.compute_hash());
    }

    #[test]
    fn test_verify_passes_for_untampered_checkpoint() {
        assert!(sample().verify_integrity());
    }

    #[test]
    fn test_tampering_any_hashed_field_invalidates() {
        let mut c = sample();
        c.iteration += 1;
        assert!(!c.verify_integrity());

        let mut c = sample();
        c.score += 0.001;
        assert!(!c.verify_integrity());

        let mut c = sample();
        c.assignments.pop();
        assert!(!c.verify_integrity());

        let mut c = sample();
        c.run_id.push('x');
        assert!(!c.verify_integrity());
    }

    #[test]
    fn test_hash_length_is_sixteen_hex_chars() {
        let c = sample();
        assert_eq!(c.hash.len(), 16);
        assert!(c.hash.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
