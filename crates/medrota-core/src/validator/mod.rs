//! ACGME compliance validation.
//!
//! Checks a candidate or persisted schedule against the duty-hour and
//! supervision requirements: the 80-hour rolling average, the 1-in-7 day
//! off rule, and PGY-scaled faculty supervision ratios. Every violation
//! kind here blocks scheduling actions, so all three map to
//! [`ViolationSeverity::Critical`].

use crate::domain::{Assignment, Block, DateRange, Person, PersonRole};
use crate::ports::ScheduleRepository;
use crate::solver::{
    required_faculty, HOURS_PER_HALF_DAY, MAX_CONSECUTIVE_DUTY_DAYS, MAX_WEEKLY_HOURS,
    ROLLING_WINDOW_WEEKS,
};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    EightyHourViolation,
    OneInSevenViolation,
    SupervisionViolation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// One detected compliance violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: ViolationSeverity,
    pub person_id: Option<Uuid>,
    pub person_name: Option<String>,
    pub block_id: Option<Uuid>,
    pub message: String,
    /// Kind-specific context, e.g. `average_weekly_hours` or
    /// `consecutive_days`.
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStatistics {
    pub total_assignments: usize,
    pub total_blocks: usize,
    pub residents_scheduled: usize,
}

/// Result of validating a schedule period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    /// Assigned non-weekend blocks over total non-weekend blocks, 0-100.
    pub coverage_rate: f64,
    pub violations: Vec<Violation>,
    pub statistics: ValidationStatistics,
}

impl ValidationReport {
    pub fn has_critical(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.severity == ViolationSeverity::Critical)
    }
}

pub struct AcgmeValidator {
    repo: Arc<dyn ScheduleRepository>,
}

impl AcgmeValidator {
    pub fn new(repo: Arc<dyn ScheduleRepository>) -> Self {
        Self { repo }
    }

    /// Validate assignments in the range. When `candidate` is provided it
    /// is validated instead of the persisted schedule.
    pub async fn validate(
        &self,
        range: DateRange,
        candidate: Option<&[Assignment]>,
    ) -> anyhow::Result<ValidationReport> {
        let residents = self.repo.people_by_role(PersonRole::Resident).await?;
        let faculty = self.repo.people_by_role(PersonRole::Faculty).await?;
        let blocks = self.repo.blocks_in_range(range.start, range.end).await?;

        let assignments: Vec<Assignment> = match candidate {
            Some(list) => list.to_vec(),
            None => {
                self.repo
                    .assignments_in_range(range.start, range.end, None)
                    .await?
            }
        };

        Ok(validate_assignments(
            &residents,
            &faculty,
            &blocks,
            &assignments,
        ))
    }
}

/// Pure validation over already-loaded data.
pub fn validate_assignments(
    residents: &[Person],
    faculty: &[Person],
    blocks: &[Block],
    assignments: &[Assignment],
) -> ValidationReport {
    let block_by_id: HashMap<Uuid, &Block> = blocks.iter().map(|b| (b.id, b)).collect();
    let mut violations = Vec::new();

    for resident in residents {
        let own: Vec<&Assignment> = assignments
            .iter()
            .filter(|a| a.person_id == resident.id)
            .collect();
        if own.is_empty() {
            continue;
        }

        let hours = hours_by_date(&own, &block_by_id);
        if let Some(v) = check_eighty_hour(resident, &hours) {
            violations.push(v);
        }
        if let Some(v) = check_one_in_seven(resident, &hours) {
            violations.push(v);
        }
    }

    violations.extend(check_supervision(residents, faculty, blocks, assignments));

    let coverage_rate = coverage_rate(blocks, assignments);

    let resident_ids: HashSet<Uuid> = residents.iter().map(|p| p.id).collect();
    let residents_scheduled = assignments
        .iter()
        .filter(|a| resident_ids.contains(&a.person_id))
        .map(|a| a.person_id)
        .collect::<HashSet<_>>()
        .len();

    ValidationReport {
        valid: violations.is_empty(),
        coverage_rate,
        statistics: ValidationStatistics {
            total_assignments: assignments.len(),
            total_blocks: blocks.len(),
            residents_scheduled,
        },
        violations,
    }
}

/// Duty hours per calendar date: each assignment contributes one half-day.
fn hours_by_date(
    assignments: &[&Assignment],
    block_by_id: &HashMap<Uuid, &Block>,
) -> BTreeMap<NaiveDate, f64> {
    let mut hours: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for a in assignments {
        if let Some(block) = block_by_id.get(&a.block_id) {
            *hours.entry(block.date).or_insert(0.0) += HOURS_PER_HALF_DAY;
        }
    }
    hours
}

/// 80-hour rule: every 28-day window starting at a duty date must average
/// at most 80 hours per week. Only the first offending window is reported
/// per resident.
fn check_eighty_hour(resident: &Person, hours: &BTreeMap<NaiveDate, f64>) -> Option<Violation> {
    let window_days = ROLLING_WINDOW_WEEKS * 7;
    for (&start, _) in hours.iter() {
        let end = start + Duration::days(window_days - 1);
        let total: f64 = hours.range(start..=end).map(|(_, &h)| h).sum();
        let avg_weekly = total / ROLLING_WINDOW_WEEKS as f64;
        if avg_weekly > MAX_WEEKLY_HOURS {
            return Some(Violation {
                kind: ViolationKind::EightyHourViolation,
                severity: ViolationSeverity::Critical,
                person_id: Some(resident.id),
                person_name: Some(resident.name.clone()),
                block_id: None,
                message: format!(
                    "{}: {:.1} hours/week (limit: {})",
                    resident.name, avg_weekly, MAX_WEEKLY_HOURS
                ),
                details: serde_json::json!({
                    "window_start": start,
                    "window_end": end,
                    "average_weekly_hours": avg_weekly,
                }),
            });
        }
    }
    None
}

/// Longest run of consecutive calendar duty days.
pub fn max_consecutive_duty_days(dates: &BTreeSet<NaiveDate>) -> i64 {
    let mut max_run = 0i64;
    let mut run = 0i64;
    let mut prev: Option<NaiveDate> = None;
    for &date in dates {
        run = match prev {
            Some(p) if (date - p).num_days() == 1 => run + 1,
            _ => 1,
        };
        max_run = max_run.max(run);
        prev = Some(date);
    }
    max_run
}

/// 1-in-7 rule: no more than six consecutive duty days.
fn check_one_in_seven(resident: &Person, hours: &BTreeMap<NaiveDate, f64>) -> Option<Violation> {
    let dates: BTreeSet<NaiveDate> = hours.keys().copied().collect();
    let longest = max_consecutive_duty_days(&dates);
    if longest > MAX_CONSECUTIVE_DUTY_DAYS {
        return Some(Violation {
            kind: ViolationKind::OneInSevenViolation,
            severity: ViolationSeverity::Critical,
            person_id: Some(resident.id),
            person_name: Some(resident.name.clone()),
            block_id: None,
            message: format!(
                "{}: {} consecutive duty days (limit: {})",
                resident.name, longest, MAX_CONSECUTIVE_DUTY_DAYS
            ),
            details: serde_json::json!({ "consecutive_days": longest }),
        });
    }
    None
}

/// Supervision ratios per block: faculty count must reach
/// `ceil(pgy1/2) + ceil(others/4)`, minimum one when residents are present.
fn check_supervision(
    residents: &[Person],
    faculty: &[Person],
    blocks: &[Block],
    assignments: &[Assignment],
) -> Vec<Violation> {
    let resident_by_id: HashMap<Uuid, &Person> = residents.iter().map(|p| (p.id, p)).collect();
    let faculty_ids: HashSet<Uuid> = faculty.iter().map(|p| p.id).collect();

    let mut by_block: HashMap<Uuid, Vec<&Assignment>> = HashMap::new();
    for a in assignments {
        by_block.entry(a.block_id).or_default().push(a);
    }

    let mut violations = Vec::new();
    for block in blocks {
        let Some(block_assignments) = by_block.get(&block.id) else {
            continue;
        };

        let mut pgy1 = 0u32;
        let mut other = 0u32;
        let mut faculty_count = 0u32;
        for a in block_assignments {
            if let Some(person) = resident_by_id.get(&a.person_id) {
                if person.is_pgy1() {
                    pgy1 += 1;
                } else {
                    other += 1;
                }
            } else if faculty_ids.contains(&a.person_id) {
                faculty_count += 1;
            }
        }

        let required = required_faculty(pgy1, other);
        if required > 0 && faculty_count < required {
            violations.push(Violation {
                kind: ViolationKind::SupervisionViolation,
                severity: ViolationSeverity::Critical,
                person_id: None,
                person_name: None,
                block_id: Some(block.id),
                message: format!(
                    "Block {} {}: {} faculty present, {} required for {} residents",
                    block.date,
                    block.half_day,
                    faculty_count,
                    required,
                    pgy1 + other
                ),
                details: serde_json::json!({
                    "pgy1_residents": pgy1,
                    "other_residents": other,
                    "faculty_present": faculty_count,
                    "faculty_required": required,
                }),
            });
        }
    }
    violations
}

/// Percentage of non-weekend blocks with at least one assignment.
fn coverage_rate(blocks: &[Block], assignments: &[Assignment]) -> f64 {
    let countable: Vec<&Block> = blocks.iter().filter(|b| !b.is_weekend).collect();
    if countable.is_empty() {
        return 0.0;
    }
    let assigned_block_ids: HashSet<Uuid> = assignments.iter().map(|a| a.block_id).collect();
    let assigned = countable
        .iter()
        .filter(|b| assigned_block_ids.contains(&b.id))
        .count();
    assigned as f64 / countable.len() as f64 * 100.0
}
