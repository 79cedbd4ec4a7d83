/// Constraint-based schedule generation.
///
/// The solver assigns people to half-day blocks for a date range, honoring
/// hard rules (duty-hour limits, supervision ratios, availability) and
/// minimizing a weighted soft objective. The pipeline:
///
/// 1. **Model construction** ([`eligibility`]): one person-variable per
///    (block, resident slot), domains pruned by absences, credentials, and
///    preserved fixed assignments.
/// 2. **Search** ([`engine`]): branch-and-bound, smallest-domain-first with
///    deterministic tie-breaking, least-loaded value ordering, incremental
///    hard-constraint checks ([`constraints`]).
/// 3. **Scoring** ([`objective`]): Gini workload imbalance, back-to-back
///    density, call variance, rotation sequencing, uncovered-slot cost.
/// 4. **Checkpointing** ([`checkpoint`]): periodic hash-verified snapshots
///    for resume after timeout, crash, or cancellation.
pub mod checkpoint;
pub mod constraints;
pub mod eligibility;
pub mod engine;
pub mod objective;
pub mod types;


pub use checkpoint::SolverCheckpoint;
pub use engine::{required_faculty, SolverEngine};
pub use types::{
    CancelToken, HardConstraintKind, SoftViolation, SoftViolationKind, SoftWeights, SolverOptions,
    SolverOutcome, SolverStatus, UnsatConstraint, HOURS_PER_HALF_DAY, MAX_CONSECUTIVE_DUTY_DAYS,
    MAX_WEEKLY_HOURS, ROLLING_WINDOW_WEEKS,
};
