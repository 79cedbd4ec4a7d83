//! Visualization data derived from a conflict list.
//!
//! Everything here is a pure function over `&[Conflict]`; the HTTP
//! collaborator renders these structures directly.

use crate::conflicts::types::{Conflict, ConflictSeverity};
use crate::domain::DateRange;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePoint {
    pub date: NaiveDate,
    /// Max severity score over conflicts overlapping this date, 0.0 when
    /// the day is clean.
    pub severity_score: f64,
    pub conflict_count: usize,
}

/// Per-day conflict pressure over a range.
pub fn timeline(conflicts: &[Conflict], range: DateRange) -> Vec<TimelinePoint> {
    range
        .iter_days()
        .map(|date| {
            let overlapping: Vec<&Conflict> = conflicts
                .iter()
                .filter(|c| c.start_date <= date && date <= c.end_date)
                .collect();
            let severity_score = overlapping
                .iter()
                .map(|c| c.severity.score())
                .fold(0.0, f64::max);
            TimelinePoint {
                date,
                severity_score,
                conflict_count: overlapping.len(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeatLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl HeatLevel {
    /// Quantize a severity score into five display levels.
    pub fn from_score(score: f64) -> Self {
        if score <= 0.0 {
            Self::None
        } else if score < 0.3 {
            Self::Low
        } else if score < 0.6 {
            Self::Medium
        } else if score < 0.9 {
            Self::High
        } else {
            Self::Critical
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapCell {
    pub date: NaiveDate,
    pub level: HeatLevel,
    pub conflict_count: usize,
}

pub fn heatmap(conflicts: &[Conflict], range: DateRange) -> Vec<HeatmapCell> {
    timeline(conflicts, range)
        .into_iter()
        .map(|point| HeatmapCell {
            date: point.date,
            level: HeatLevel::from_score(point.severity_score),
            conflict_count: point.conflict_count,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConflictDistribution {
    pub by_category: HashMap<String, usize>,
    pub by_type: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
}

pub fn distribution(conflicts: &[Conflict]) -> ConflictDistribution {
    let mut dist = ConflictDistribution::default();
    for c in conflicts {
        *dist
            .by_category
            .entry(c.category.as_str().to_string())
            .or_insert(0) += 1;
        *dist
            .by_type
            .entry(c.conflict_type.as_str().to_string())
            .or_insert(0) += 1;
        *dist
            .by_severity
            .entry(c.severity.as_str().to_string())
            .or_insert(0) += 1;
    }
    dist
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonImpact {
    pub person_id: Uuid,
    pub conflict_count: usize,
    pub avg_severity_score: f64,
    pub max_severity: ConflictSeverity,
}

/// People ranked by conflict count, then average severity.
pub fn person_impact(conflicts: &[Conflict]) -> Vec<PersonImpact> {
    let mut per_person: HashMap<Uuid, Vec<&Conflict>> = HashMap::new();
    for c in conflicts {
        for &person in &c.affected_people {
            per_person.entry(person).or_default().push(c);
        }
    }

    let mut impacts: Vec<PersonImpact> = per_person
        .into_iter()
        .map(|(person_id, list)| {
            let avg = list.iter().map(|c| c.severity.score()).sum::<f64>() / list.len() as f64;
            let max_severity = list
                .iter()
                .map(|c| c.severity)
                .max()
                .unwrap_or(ConflictSeverity::Low);
            PersonImpact {
                person_id,
                conflict_count: list.len(),
                avg_severity_score: avg,
                max_severity,
            }
        })
        .collect();

    impacts.sort_by(|a, b| {
        b.conflict_count.cmp(&a.conflict_count).then_with(|| {
            b.avg_severity_score
                .partial_cmp(&a.avg_severity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
    impacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflicts::types::{conflict_id, ConflictCategory, ConflictType};
    use chrono::Utc;

    fn conflict_on(
        start: NaiveDate,
        end: NaiveDate,
        severity: ConflictSeverity,
        people: Vec<Uuid>,
    ) -> Conflict {
        Conflict {
            conflict_id: conflict_id(ConflictType::DoubleBooking, &people, start, end),
            category: ConflictCategory::TimeOverlap,
            conflict_type: ConflictType::DoubleBooking,
            severity,
            title: String::new(),
            description: String::new(),
            start_date: start,
            end_date: end,
            detected_at: Utc::now(),
            affected_people: people,
            affected_blocks: Vec::new(),
            affected_assignments: Vec::new(),
            impact_score: 0.5,
            urgency_score: 0.5,
            complexity_score: 0.5,
            auto_resolvable: false,
            context: serde_json::Value::Null,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[test]
    fn test_timeline_takes_max_severity_per_day() {
        let conflicts = vec![
            conflict_on(day(1), day(3), ConflictSeverity::Low, vec![Uuid::new_v4()]),
            conflict_on(day(2), day(2), ConflictSeverity::Critical, vec![Uuid::new_v4()]),
        ];
        let points = timeline(&conflicts, DateRange::new(day(1), day(4)));
        assert_eq!(points.len(), 4);
        assert_eq!(points[0].severity_score, 0.25);
        assert_eq!(points[1].severity_score, 1.0);
        assert_eq!(points[1].conflict_count, 2);
        assert_eq!(points[3].severity_score, 0.0);
    }

    #[test]
    fn test_heat_level_quantization() {
        assert_eq!(HeatLevel::from_score(0.0), HeatLevel::None);
        assert_eq!(HeatLevel::from_score(0.25), HeatLevel::Low);
        assert_eq!(HeatLevel::from_score(0.5), HeatLevel::Medium);
        assert_eq!(HeatLevel::from_score(0.75), HeatLevel::High);
        assert_eq!(HeatLevel::from_score(1.0), HeatLevel::Critical);
    }

    #[test]
    fn test_person_impact_ranking() {
        let busy = Uuid::new_v4();
        let quiet = Uuid::new_v4();
        let conflicts = vec![
            conflict_on(day(1), day(1), ConflictSeverity::High, vec![busy]),
            conflict_on(day(2), day(2), ConflictSeverity::Low, vec![busy]),
            conflict_on(day(3), day(3), ConflictSeverity::Critical, vec![quiet]),
        ];
        let impacts = person_impact(&conflicts);
        assert_eq!(impacts[0].person_id, busy);
        assert_eq!(impacts[0].conflict_count, 2);
        assert_eq!(impacts[1].person_id, quiet);
        assert_eq!(impacts[1].max_severity, ConflictSeverity::Critical);
    }

    #[test]
    fn test_distribution_counts_every_axis() {
        let conflicts = vec![
            conflict_on(day(1), day(1), ConflictSeverity::High, vec![Uuid::new_v4()]),
            conflict_on(day(2), day(2), ConflictSeverity::High, vec![Uuid::new_v4()]),
        ];
        let dist = distribution(&conflicts);
        assert_eq!(dist.by_category["time_overlap"], 2);
        assert_eq!(dist.by_type["double_booking"], 2);
        assert_eq!(dist.by_severity["high"], 2);
    }
}
