//! Conflict type system: categories, severities, and the conflict record.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictCategory {
    TimeOverlap,
    ResourceContention,
    AcgmeViolation,
    SupervisionIssue,
    AvailabilityConflict,
    WorkloadImbalance,
    PatternViolation,
}

impl ConflictCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeOverlap => "time_overlap",
            Self::ResourceContention => "resource_contention",
            Self::AcgmeViolation => "acgme_violation",
            Self::SupervisionIssue => "supervision_issue",
            Self::AvailabilityConflict => "availability_conflict",
            Self::WorkloadImbalance => "workload_imbalance",
            Self::PatternViolation => "pattern_violation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    DoubleBooking,
    InsufficientCoverage,
    SupervisionRatioViolation,
    EightyHourViolation,
    OneInSevenViolation,
    AssignedDuringAbsence,
    ExcessiveWorkload,
    ExcessiveConsecutiveDays,
    ExcessiveBackToBack,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DoubleBooking => "double_booking",
            Self::InsufficientCoverage => "insufficient_coverage",
            Self::SupervisionRatioViolation => "supervision_ratio_violation",
            Self::EightyHourViolation => "eighty_hour_violation",
            Self::OneInSevenViolation => "one_in_seven_violation",
            Self::AssignedDuringAbsence => "assigned_during_absence",
            Self::ExcessiveWorkload => "excessive_workload",
            Self::ExcessiveConsecutiveDays => "excessive_consecutive_days",
            Self::ExcessiveBackToBack => "excessive_back_to_back",
        }
    }
}

/// CRITICAL blocks scheduling actions; LOW is suboptimal but acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ConflictSeverity {
    /// Numeric score used by the visualization layer.
    pub fn score(&self) -> f64 {
        match self {
            Self::Critical => 1.0,
            Self::High => 0.75,
            Self::Medium => 0.5,
            Self::Low => 0.25,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// A detected rule violation over a date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Content-derived id; identical findings from different detectors
    /// de-duplicate on it.
    pub conflict_id: String,
    pub category: ConflictCategory,
    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    pub title: String,
    pub description: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub detected_at: DateTime<Utc>,
    pub affected_people: Vec<Uuid>,
    pub affected_blocks: Vec<Uuid>,
    pub affected_assignments: Vec<Uuid>,
    /// Breadth of the conflict, in [0, 1].
    pub impact_score: f64,
    /// How soon it needs resolution, in [0, 1].
    pub urgency_score: f64,
    /// Resolution difficulty, in [0, 1].
    pub complexity_score: f64,
    pub auto_resolvable: bool,
    pub context: serde_json::Value,
}

impl Conflict {
    /// Unified display score used for ordering below the severity ordinal.
    pub fn display_score(&self) -> f64 {
        self.impact_score * 0.5 + self.urgency_score * 0.3 + self.complexity_score * 0.2
    }

    /// Coarse resolution-difficulty label derived from the complexity
    /// score, for display next to the numeric scores.
    pub fn resolution_difficulty(&self) -> &'static str {
        if self.complexity_score < 0.34 {
            "easy"
        } else if self.complexity_score < 0.67 {
            "medium"
        } else {
            "hard"
        }
    }
}

/// Derive a stable conflict id from its identity fields: kind, sorted
/// affected entities, and the date range.
pub fn conflict_id(
    conflict_type: ConflictType,
    affected: &[Uuid],
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> String {
    let mut sorted: Vec<Uuid> = affected.to_vec();
    sorted.sort();

    let mut hasher = Sha256::new();
    hasher.update(conflict_type.as_str().as_bytes());
    for id in &sorted {
        hasher.update(id.as_bytes());
    }
    hasher.update(start_date.to_string().as_bytes());
    hasher.update(end_date.to_string().as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_id_ignores_affected_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(
            conflict_id(ConflictType::DoubleBooking, &[a, b], start, end),
            conflict_id(ConflictType::DoubleBooking, &[b, a], start, end),
        );
    }

    #[test]
    fn test_conflict_id_distinguishes_type_and_range() {
        let a = Uuid::new_v4();
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        let base = conflict_id(ConflictType::DoubleBooking, &[a], start, end);
        assert_ne!(
            base,
            conflict_id(ConflictType::ExcessiveWorkload, &[a], start, end)
        );
        assert_ne!(
            base,
            conflict_id(ConflictType::DoubleBooking, &[a], start, start)
        );
    }

    #[test]
    fn test_severity_ordering_puts_critical_on_top() {
        assert!(ConflictSeverity::Critical > ConflictSeverity::High);
        assert!(ConflictSeverity::High > ConflictSeverity::Medium);
        assert!(ConflictSeverity::Medium > ConflictSeverity::Low);
    }
}
