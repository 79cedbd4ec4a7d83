//! Conflict detectors.
//!
//! Each detector owns one category and exposes the same small operation;
//! the engine composes them, runs them concurrently, and merges results.

use crate::conflicts::types::{
    conflict_id, Conflict, ConflictCategory, ConflictSeverity, ConflictType,
};
use crate::domain::{Absence, Assignment, Block, HalfDay, Person};
use crate::validator::{self, ViolationKind};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Shared read-only input for one analysis run.
pub struct AnalysisContext {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Analysis reference point for urgency scoring.
    pub today: NaiveDate,
    pub residents: Vec<Person>,
    pub faculty: Vec<Person>,
    pub blocks: Vec<Block>,
    pub assignments: Vec<Assignment>,
    pub absences: Vec<Absence>,
}

impl AnalysisContext {
    pub fn block_by_id(&self) -> HashMap<Uuid, &Block> {
        self.blocks.iter().map(|b| (b.id, b)).collect()
    }

    pub fn resident_by_id(&self) -> HashMap<Uuid, &Person> {
        self.residents.iter().map(|p| (p.id, p)).collect()
    }

    /// Breadth score over affected people and blocks, in [0, 1].
    pub fn impact(&self, people: usize, blocks: usize) -> f64 {
        let people_total = (self.residents.len() + self.faculty.len()).max(1);
        let blocks_total = self.blocks.len().max(1);
        let people_part = people as f64 / people_total as f64;
        let blocks_part = blocks as f64 / blocks_total as f64;
        (people_part * 0.6 + blocks_part * 0.4).min(1.0)
    }

    /// Urgency from days until the conflict starts: overdue or immediate
    /// conflicts score 1.0, falling off linearly over 30 days.
    pub fn urgency(&self, conflict_start: NaiveDate) -> f64 {
        let days_until = (conflict_start - self.today).num_days();
        if days_until <= 0 {
            1.0
        } else {
            (1.0 - days_until as f64 / 30.0).max(0.0)
        }
    }
}

#[async_trait]
pub trait ConflictDetector: Send + Sync {
    fn category(&self) -> ConflictCategory;

    async fn detect(&self, ctx: &AnalysisContext) -> Vec<Conflict>;
}

// ============================================================================
// TIME OVERLAP
// ============================================================================

/// A person assigned to more than one block at the same half-day.
pub struct TimeOverlapDetector;

#[async_trait]
impl ConflictDetector for TimeOverlapDetector {
    fn category(&self) -> ConflictCategory {
        ConflictCategory::TimeOverlap
    }

    async fn detect(&self, ctx: &AnalysisContext) -> Vec<Conflict> {
        let block_by_id = ctx.block_by_id();
        let mut slots: HashMap<(Uuid, NaiveDate, HalfDay), Vec<&Assignment>> = HashMap::new();
        for a in &ctx.assignments {
            if let Some(block) = block_by_id.get(&a.block_id) {
                slots
                    .entry((a.person_id, block.date, block.half_day))
                    .or_default()
                    .push(a);
            }
        }

        let mut conflicts = Vec::new();
        for ((person_id, date, half_day), overlapping) in slots {
            if overlapping.len() < 2 {
                continue;
            }
            let blocks: Vec<Uuid> = overlapping.iter().map(|a| a.block_id).collect();
            let assignment_ids: Vec<Uuid> = overlapping.iter().map(|a| a.id).collect();
            conflicts.push(Conflict {
                conflict_id: conflict_id(ConflictType::DoubleBooking, &blocks, date, date),
                category: ConflictCategory::TimeOverlap,
                conflict_type: ConflictType::DoubleBooking,
                severity: ConflictSeverity::High,
                title: "Double booking".to_string(),
                description: format!(
                    "Person scheduled {} times on {} {}",
                    overlapping.len(),
                    date,
                    half_day
                ),
                start_date: date,
                end_date: date,
                detected_at: Utc::now(),
                affected_people: vec![person_id],
                affected_blocks: blocks,
                affected_assignments: assignment_ids,
                impact_score: ctx.impact(1, overlapping.len()),
                urgency_score: ctx.urgency(date),
                complexity_score: 0.25,
                auto_resolvable: true,
                context: serde_json::json!({ "half_day": half_day }),
            });
        }
        conflicts
    }
}

// ============================================================================
// RESOURCE CONTENTION
// ============================================================================

/// Non-weekend blocks with no assignments at all.
pub struct ResourceContentionDetector;

#[async_trait]
impl ConflictDetector for ResourceContentionDetector {
    fn category(&self) -> ConflictCategory {
        ConflictCategory::ResourceContention
    }

    async fn detect(&self, ctx: &AnalysisContext) -> Vec<Conflict> {
        let assigned: BTreeSet<Uuid> = ctx.assignments.iter().map(|a| a.block_id).collect();
        ctx.blocks
            .iter()
            .filter(|b| !b.is_weekend && !assigned.contains(&b.id))
            .map(|block| Conflict {
                conflict_id: conflict_id(
                    ConflictType::InsufficientCoverage,
                    &[block.id],
                    block.date,
                    block.date,
                ),
                category: ConflictCategory::ResourceContention,
                conflict_type: ConflictType::InsufficientCoverage,
                severity: ConflictSeverity::Medium,
                title: "Uncovered block".to_string(),
                description: format!("No coverage on {} {}", block.date, block.half_day),
                start_date: block.date,
                end_date: block.date,
                detected_at: Utc::now(),
                affected_people: Vec::new(),
                affected_blocks: vec![block.id],
                affected_assignments: Vec::new(),
                impact_score: ctx.impact(0, 1),
                urgency_score: ctx.urgency(block.date),
                complexity_score: 0.25,
                auto_resolvable: false,
                context: serde_json::Value::Null,
            })
            .collect()
    }
}

// ============================================================================
// ACGME + SUPERVISION
// ============================================================================

/// Duty-hour violations (80-hour and 1-in-7), reusing the validator rules.
pub struct AcgmeViolationDetector;

#[async_trait]
impl ConflictDetector for AcgmeViolationDetector {
    fn category(&self) -> ConflictCategory {
        ConflictCategory::AcgmeViolation
    }

    async fn detect(&self, ctx: &AnalysisContext) -> Vec<Conflict> {
        validator_conflicts(ctx, |kind| {
            matches!(
                kind,
                ViolationKind::EightyHourViolation | ViolationKind::OneInSevenViolation
            )
        })
    }
}

/// Supervision ratio shortfalls, reusing the validator rules.
pub struct SupervisionDetector;

#[async_trait]
impl ConflictDetector for SupervisionDetector {
    fn category(&self) -> ConflictCategory {
        ConflictCategory::SupervisionIssue
    }

    async fn detect(&self, ctx: &AnalysisContext) -> Vec<Conflict> {
        validator_conflicts(ctx, |kind| kind == ViolationKind::SupervisionViolation)
    }
}

fn validator_conflicts(
    ctx: &AnalysisContext,
    keep: impl Fn(ViolationKind) -> bool,
) -> Vec<Conflict> {
    let report = validator::validate_assignments(
        &ctx.residents,
        &ctx.faculty,
        &ctx.blocks,
        &ctx.assignments,
    );
    let block_by_id = ctx.block_by_id();

    report
        .violations
        .into_iter()
        .filter(|v| keep(v.kind))
        .map(|v| {
            let (category, conflict_type, complexity) = match v.kind {
                ViolationKind::EightyHourViolation => (
                    ConflictCategory::AcgmeViolation,
                    ConflictType::EightyHourViolation,
                    0.75,
                ),
                ViolationKind::OneInSevenViolation => (
                    ConflictCategory::AcgmeViolation,
                    ConflictType::OneInSevenViolation,
                    0.5,
                ),
                ViolationKind::SupervisionViolation => (
                    ConflictCategory::SupervisionIssue,
                    ConflictType::SupervisionRatioViolation,
                    0.5,
                ),
            };

            let affected_people: Vec<Uuid> = v.person_id.into_iter().collect();
            let affected_blocks: Vec<Uuid> = v.block_id.into_iter().collect();
            let start = v
                .block_id
                .and_then(|id| block_by_id.get(&id).map(|b| b.date))
                .unwrap_or(ctx.start_date);
            let mut affected = affected_people.clone();
            affected.extend(&affected_blocks);

            Conflict {
                conflict_id: conflict_id(conflict_type, &affected, start, ctx.end_date),
                category,
                conflict_type,
                severity: ConflictSeverity::Critical,
                title: v.message.clone(),
                description: v.message,
                start_date: start,
                end_date: if affected_blocks.is_empty() {
                    ctx.end_date
                } else {
                    start
                },
                detected_at: Utc::now(),
                affected_people,
                affected_blocks,
                affected_assignments: Vec::new(),
                impact_score: ctx.impact(1, 1),
                urgency_score: ctx.urgency(start),
                complexity_score: complexity,
                auto_resolvable: false,
                context: v.details,
            }
        })
        .collect()
}

// ============================================================================
// AVAILABILITY
// ============================================================================

/// Assignments that fall inside a person's absence.
pub struct AvailabilityDetector;

#[async_trait]
impl ConflictDetector for AvailabilityDetector {
    fn category(&self) -> ConflictCategory {
        ConflictCategory::AvailabilityConflict
    }

    async fn detect(&self, ctx: &AnalysisContext) -> Vec<Conflict> {
        let block_by_id = ctx.block_by_id();
        let mut by_person: HashMap<Uuid, Vec<&Absence>> = HashMap::new();
        for absence in &ctx.absences {
            by_person.entry(absence.person_id).or_default().push(absence);
        }

        let mut conflicts = Vec::new();
        for a in &ctx.assignments {
            let Some(block) = block_by_id.get(&a.block_id) else {
                continue;
            };
            let Some(absences) = by_person.get(&a.person_id) else {
                continue;
            };
            if let Some(absence) = absences.iter().find(|ab| ab.covers(block.date)) {
                conflicts.push(Conflict {
                    conflict_id: conflict_id(
                        ConflictType::AssignedDuringAbsence,
                        &[a.person_id, a.block_id],
                        block.date,
                        block.date,
                    ),
                    category: ConflictCategory::AvailabilityConflict,
                    conflict_type: ConflictType::AssignedDuringAbsence,
                    severity: ConflictSeverity::High,
                    title: "Assigned during absence".to_string(),
                    description: format!(
                        "Assignment on {} {} falls inside a {} absence",
                        block.date, block.half_day, absence.kind
                    ),
                    start_date: block.date,
                    end_date: block.date,
                    detected_at: Utc::now(),
                    affected_people: vec![a.person_id],
                    affected_blocks: vec![a.block_id],
                    affected_assignments: vec![a.id],
                    impact_score: ctx.impact(1, 1),
                    urgency_score: ctx.urgency(block.date),
                    complexity_score: 0.25,
                    auto_resolvable: true,
                    context: serde_json::json!({ "absence_kind": absence.kind }),
                });
            }
        }
        conflicts
    }
}

// ============================================================================
// WORKLOAD IMBALANCE
// ============================================================================

/// Residents whose assignment count sits far above the cohort mean.
pub struct WorkloadImbalanceDetector {
    /// Z-score above which workload is flagged.
    pub threshold: f64,
}

impl Default for WorkloadImbalanceDetector {
    fn default() -> Self {
        Self { threshold: 1.5 }
    }
}

#[async_trait]
impl ConflictDetector for WorkloadImbalanceDetector {
    fn category(&self) -> ConflictCategory {
        ConflictCategory::WorkloadImbalance
    }

    async fn detect(&self, ctx: &AnalysisContext) -> Vec<Conflict> {
        if ctx.residents.len() < 2 {
            return Vec::new();
        }
        let resident_by_id = ctx.resident_by_id();
        let mut counts: HashMap<Uuid, u32> =
            ctx.residents.iter().map(|p| (p.id, 0)).collect();
        for a in &ctx.assignments {
            if let Some(count) = counts.get_mut(&a.person_id) {
                *count += 1;
            }
        }

        let n = counts.len() as f64;
        let mean = counts.values().map(|&c| c as f64).sum::<f64>() / n;
        let variance = counts
            .values()
            .map(|&c| {
                let d = c as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        let stddev = variance.sqrt();
        if stddev < f64::EPSILON {
            return Vec::new();
        }

        counts
            .into_iter()
            .filter(|(_, count)| (*count as f64 - mean) / stddev > self.threshold)
            .map(|(person_id, count)| {
                let name = resident_by_id
                    .get(&person_id)
                    .map(|p| p.name.clone())
                    .unwrap_or_default();
                Conflict {
                    conflict_id: conflict_id(
                        ConflictType::ExcessiveWorkload,
                        &[person_id],
                        ctx.start_date,
                        ctx.end_date,
                    ),
                    category: ConflictCategory::WorkloadImbalance,
                    conflict_type: ConflictType::ExcessiveWorkload,
                    severity: ConflictSeverity::Medium,
                    title: format!("Excessive workload: {}", name),
                    description: format!(
                        "{} holds {} assignments against a cohort mean of {:.1}",
                        name, count, mean
                    ),
                    start_date: ctx.start_date,
                    end_date: ctx.end_date,
                    detected_at: Utc::now(),
                    affected_people: vec![person_id],
                    affected_blocks: Vec::new(),
                    affected_assignments: Vec::new(),
                    impact_score: ctx.impact(1, count as usize),
                    urgency_score: ctx.urgency(ctx.start_date),
                    complexity_score: 0.5,
                    auto_resolvable: false,
                    context: serde_json::json!({ "count": count, "mean": mean }),
                }
            })
            .collect()
    }
}

// ============================================================================
// PATTERN
// ============================================================================

/// Undesirable but legal patterns: long duty runs and dense full days.
pub struct PatternDetector {
    /// Consecutive duty days worth flagging (still under the ACGME limit).
    pub consecutive_days_threshold: i64,
    /// Fraction of duty days that are full days (AM + PM) worth flagging.
    pub back_to_back_threshold: f64,
}

impl Default for PatternDetector {
    fn default() -> Self {
        Self {
            consecutive_days_threshold: 5,
            back_to_back_threshold: 0.6,
        }
    }
}

#[async_trait]
impl ConflictDetector for PatternDetector {
    fn category(&self) -> ConflictCategory {
        ConflictCategory::PatternViolation
    }

    async fn detect(&self, ctx: &AnalysisContext) -> Vec<Conflict> {
        let block_by_id = ctx.block_by_id();
        let resident_by_id = ctx.resident_by_id();

        let mut duty_days: HashMap<Uuid, BTreeSet<NaiveDate>> = HashMap::new();
        let mut halves: HashMap<(Uuid, NaiveDate), BTreeSet<HalfDay>> = HashMap::new();
        for a in &ctx.assignments {
            if !resident_by_id.contains_key(&a.person_id) {
                continue;
            }
            if let Some(block) = block_by_id.get(&a.block_id) {
                duty_days.entry(a.person_id).or_default().insert(block.date);
                halves
                    .entry((a.person_id, block.date))
                    .or_default()
                    .insert(block.half_day);
            }
        }

        let mut conflicts = Vec::new();
        for (person_id, dates) in &duty_days {
            let name = resident_by_id
                .get(person_id)
                .map(|p| p.name.clone())
                .unwrap_or_default();

            let longest = crate::validator::max_consecutive_duty_days(dates);
            if longest >= self.consecutive_days_threshold
                && longest <= crate::solver::MAX_CONSECUTIVE_DUTY_DAYS
            {
                conflicts.push(Conflict {
                    conflict_id: conflict_id(
                        ConflictType::ExcessiveConsecutiveDays,
                        &[*person_id],
                        ctx.start_date,
                        ctx.end_date,
                    ),
                    category: ConflictCategory::PatternViolation,
                    conflict_type: ConflictType::ExcessiveConsecutiveDays,
                    severity: ConflictSeverity::Low,
                    title: format!("Long duty run: {}", name),
                    description: format!("{} works {} consecutive days", name, longest),
                    start_date: ctx.start_date,
                    end_date: ctx.end_date,
                    detected_at: Utc::now(),
                    affected_people: vec![*person_id],
                    affected_blocks: Vec::new(),
                    affected_assignments: Vec::new(),
                    impact_score: ctx.impact(1, longest as usize),
                    urgency_score: ctx.urgency(ctx.start_date),
                    complexity_score: 0.25,
                    auto_resolvable: false,
                    context: serde_json::json!({ "consecutive_days": longest }),
                });
            }

            let day_count = dates.len();
            let full_days = dates
                .iter()
                .filter(|&&d| {
                    halves
                        .get(&(*person_id, d))
                        .map_or(false, |h| h.len() == 2)
                })
                .count();
            if day_count > 0 && full_days as f64 / day_count as f64 >= self.back_to_back_threshold
            {
                conflicts.push(Conflict {
                    conflict_id: conflict_id(
                        ConflictType::ExcessiveBackToBack,
                        &[*person_id],
                        ctx.start_date,
                        ctx.end_date,
                    ),
                    category: ConflictCategory::PatternViolation,
                    conflict_type: ConflictType::ExcessiveBackToBack,
                    severity: ConflictSeverity::Low,
                    title: format!("Dense schedule: {}", name),
                    description: format!(
                        "{} of {} duty days are full AM+PM days",
                        full_days, day_count
                    ),
                    start_date: ctx.start_date,
                    end_date: ctx.end_date,
                    detected_at: Utc::now(),
                    affected_people: vec![*person_id],
                    affected_blocks: Vec::new(),
                    affected_assignments: Vec::new(),
                    impact_score: ctx.impact(1, full_days),
                    urgency_score: ctx.urgency(ctx.start_date),
                    complexity_score: 0.25,
                    auto_resolvable: false,
                    context: serde_json::json!({
                        "full_days": full_days,
                        "duty_days": day_count,
                    }),
                });
            }
        }
        conflicts
    }
}

/// The default detector set, one per category.
pub fn default_detectors() -> Vec<Box<dyn ConflictDetector>> {
    vec![
        Box::new(TimeOverlapDetector),
        Box::new(ResourceContentionDetector),
        Box::new(AcgmeViolationDetector),
        Box::new(SupervisionDetector),
        Box::new(AvailabilityDetector),
        Box::new(WorkloadImbalanceDetector::default()),
        Box::new(PatternDetector::default()),
    ]
}
