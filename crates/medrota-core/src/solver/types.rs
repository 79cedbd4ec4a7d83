/// Core types for the constraint solver.
use crate::domain::Assignment;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Hours contributed by one AM or PM assignment (realistic clinical duty).
pub const HOURS_PER_HALF_DAY: f64 = 6.0;

/// Maximum averaged weekly duty hours (ACGME 80-hour rule).
pub const MAX_WEEKLY_HOURS: f64 = 80.0;

/// Rolling window for duty-hour averaging, in weeks.
pub const ROLLING_WINDOW_WEEKS: i64 = 4;

/// Maximum consecutive duty days before the 1-in-7 rule is violated.
pub const MAX_CONSECUTIVE_DUTY_DAYS: i64 = 6;

// ============================================================================
// CANCELLATION
// ============================================================================

/// Cooperative cancellation flag shared between a solver run and its owner.
///
/// Observed at the start of every iteration; on cancellation the run saves a
/// final checkpoint and returns `SolverStatus::Canceled`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ============================================================================
// SOFT OBJECTIVE WEIGHTS
// ============================================================================

/// Weights for the solver's soft objective. Lower total cost is better.
///
/// These are configuration, not constants: callers may override any weight
/// per run. The defaults below are the documented baseline:
/// - `imbalance` (10.0): Gini coefficient of per-resident assignment counts
/// - `back_to_back` (2.0): density of same-day AM+PM pairs per resident
/// - `call_variance` (4.0): variance of per-resident call assignment counts
/// - `sequencing` (1.0): rotation switches on adjacent duty days
/// - `uncovered` (25.0): per uncovered slot, multiplied by slot priority
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoftWeights {
    pub imbalance: f64,
    pub back_to_back: f64,
    pub call_variance: f64,
    pub sequencing: f64,
    pub uncovered: f64,
}

impl Default for SoftWeights {
    fn default() -> Self {
        Self {
            imbalance: 10.0,
            back_to_back: 2.0,
            call_variance: 4.0,
            sequencing: 1.0,
            uncovered: 25.0,
        }
    }
}

// ============================================================================
// OPTIONS
// ============================================================================

/// Options for one solver run.
#[derive(Debug, Clone)]
pub struct SolverOptions {
    /// Identifier under which checkpoints are stored.
    pub run_id: String,
    /// Template code the run schedules, e.g. "clinic".
    pub template_code: String,
    /// Wall-clock budget; on expiry the best feasible intermediate returns
    /// with `SolverStatus::Timeout`.
    pub timeout: Duration,
    /// Save a checkpoint every N iterations. 0 disables checkpointing.
    pub checkpoint_every: u64,
    /// Keep existing assignments in range fixed instead of replacing them.
    pub preserve_fixed: bool,
    /// Produce a draft (caller decides whether to commit); the engine never
    /// writes assignments itself either way, this is carried for callers.
    pub draft: bool,
    pub weights: SoftWeights,
    pub cancel: CancelToken,
}

impl SolverOptions {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            template_code: "clinic".to_string(),
            timeout: Duration::from_secs(60),
            checkpoint_every: 100,
            preserve_fixed: false,
            draft: false,
            weights: SoftWeights::default(),
            cancel: CancelToken::new(),
        }
    }
}

// ============================================================================
// OUTCOME
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
    Solved,
    Timeout,
    Infeasible,
    Canceled,
}

/// One hard constraint that could not be satisfied, part of the UNSAT core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsatConstraint {
    pub kind: HardConstraintKind,
    pub block_id: Option<Uuid>,
    pub person_id: Option<Uuid>,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardConstraintKind {
    DoubleBooking,
    SupervisionRatio,
    OneInSeven,
    EightyHour,
    SlotCapacity,
}

/// A soft-rule violation carried by a solution. Does not block acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftViolation {
    pub kind: SoftViolationKind,
    pub block_id: Option<Uuid>,
    pub cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftViolationKind {
    UncoveredBlock,
}

/// Result of a solver run. Timed-out and canceled runs are normal returns
/// carrying the best-so-far solution; infeasibility carries the UNSAT core.
#[derive(Debug, Clone)]
pub struct SolverOutcome {
    pub status: SolverStatus,
    pub assignments: Vec<Assignment>,
    pub score: f64,
    pub soft_violations: Vec<SoftViolation>,
    pub unsat_core: Vec<UnsatConstraint>,
    pub iterations: u64,
}

impl SolverOutcome {
    pub(crate) fn infeasible(unsat_core: Vec<UnsatConstraint>, iterations: u64) -> Self {
        Self {
            status: SolverStatus::Infeasible,
            assignments: Vec::new(),
            score: f64::INFINITY,
            soft_violations: Vec::new(),
            unsat_core,
            iterations,
        }
    }
}
